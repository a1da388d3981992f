use quarry_orm::prelude::*;
use quarry_orm::{KeyType, RelationKind};

#[derive(Entity, Debug, Clone)]
#[quarry(fillable("name", "score"), hidden("secret"), soft_deletes, per_page = 25)]
struct Player {
    id: Option<i64>,
    name: String,
    #[quarry(cast = "float")]
    score: f64,
    #[quarry(column = "secret_token")]
    secret: Option<String>,
    #[quarry(skip)]
    session: Option<String>,
    #[quarry(has_many(Match, foreign_key = "winner_id"))]
    wins: Vec<Match>,
    #[quarry(belongs_to(Team))]
    team: Option<Team>,
}

#[derive(Entity, Debug, Clone)]
#[quarry(name = "Match", table = "fixtures", timestamps = false)]
struct Match {
    id: Option<i64>,
    winner_id: Option<i64>,
}

#[derive(Entity, Debug, Clone)]
#[quarry(key_type = "uuid", incrementing = false, timestamps = false, morph_alias = "team")]
struct Team {
    id: Option<String>,
    label: String,
    #[quarry(morph_many(Badge, name = "holder"))]
    badges: Vec<Badge>,
}

#[derive(Entity, Debug, Clone)]
#[quarry(timestamps = false)]
struct Badge {
    id: Option<i64>,
    #[quarry(morph_to(name = "holder"))]
    holder: Option<Model>,
}

#[test]
fn derive_entity_generates_definition() {
    let player = Player::definition().build();
    assert_eq!(Player::NAME, "Player");
    assert_eq!(player.table, "players");
    assert_eq!(player.fillable, vec!["name", "score"]);
    assert_eq!(player.hidden, vec!["secret"]);
    assert!(player.soft_deletes);
    assert!(player.timestamps);
    assert_eq!(player.per_page, 25);
    assert_eq!(player.cast("score"), Some(Cast::Float));
    assert_eq!(player.relation("wins").unwrap().kind(), RelationKind::HasMany);
    assert_eq!(player.relation("team").unwrap().kind(), RelationKind::BelongsTo);

    let fixture = Match::definition().build();
    assert_eq!(fixture.name, "Match");
    assert_eq!(fixture.table, "fixtures");
    assert!(!fixture.timestamps);

    let team = Team::definition().build();
    assert_eq!(team.key_type, KeyType::Uuid);
    assert!(!team.incrementing);
    assert_eq!(team.morph_alias.as_deref(), Some("team"));
    assert_eq!(team.relation("badges").unwrap().kind(), RelationKind::MorphMany);

    let badge = Badge::definition().build();
    assert_eq!(badge.relation("holder").unwrap().kind(), RelationKind::MorphTo);
}

#[test]
fn derive_entity_round_trips_through_model() {
    let registry = Registry::new();
    let player = Player {
        id: Some(3),
        name: "ann".to_owned(),
        score: 9.5,
        secret: Some("s3cret".to_owned()),
        session: Some("dropped".to_owned()),
        wins: Vec::new(),
        team: None,
    };

    let model = Model::from_entity(&player, &registry);
    assert_eq!(model.get_raw("secret_token"), Value::from("s3cret"));
    assert!(model.get_raw("session").is_null());

    let back: Player = model.to_entity().unwrap();
    assert_eq!(back.name, "ann");
    assert_eq!(back.score, 9.5);
    assert_eq!(back.secret.as_deref(), Some("s3cret"));
    assert_eq!(back.session, None);
    assert!(back.wins.is_empty());
}

#[test]
fn derive_entity_reads_loaded_relations() {
    let registry = Registry::new();
    let mut model = Model::from_entity(
        &Player {
            id: Some(1),
            name: "bo".to_owned(),
            score: 1.0,
            secret: None,
            session: None,
            wins: Vec::new(),
            team: None,
        },
        &registry,
    );
    let wins: Collection = [4_i64, 5]
        .into_iter()
        .map(|id| {
            Model::from_entity(
                &Match {
                    id: Some(id),
                    winner_id: Some(1),
                },
                &registry,
            )
        })
        .collect();
    model.set_relation("wins", Loaded::Many(wins));
    model.set_relation(
        "team",
        Loaded::One(Some(Box::new(Model::from_entity(
            &Team {
                id: Some("t-1".to_owned()),
                label: "red".to_owned(),
                badges: Vec::new(),
            },
            &registry,
        )))),
    );

    let player: Player = model.to_entity().unwrap();
    let ids: Vec<Option<i64>> = player.wins.iter().map(|win| win.id).collect();
    assert_eq!(ids, vec![Some(4), Some(5)]);
    assert_eq!(player.team.map(|team| team.label), Some("red".to_owned()));
}
