use std::sync::Arc;

use proptest::prelude::*;
use quarry_core::grammar::{Grammar, MySqlQueryGrammar, QueryGrammar, SqliteQueryGrammar};
use quarry_core::query::{Builder, Constrainable};
use quarry_core::value::Value;

fn sqlite() -> Arc<dyn QueryGrammar> {
    Arc::new(SqliteQueryGrammar::new(""))
}

fn mysql() -> Arc<dyn QueryGrammar> {
    Arc::new(MySqlQueryGrammar::new(""))
}

fn identifier_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_\"`]{0,31}"
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn filter_eq_quotes_identifier(column in identifier_strategy(), value in any::<i64>()) {
        for grammar in [sqlite(), mysql()] {
            let query = Builder::new(grammar.clone()).from("users").filter_eq(&column, value);
            let quoted = grammar.wrap_value(&column);
            let expected = format!("{quoted} = ?");
            prop_assert!(query.to_sql().contains(&expected));
            prop_assert_eq!(query.bindings(), vec![Value::Int(value)]);
        }
    }

    #[test]
    fn values_are_always_bound(value in ".*") {
        for grammar in [sqlite(), mysql()] {
            let query = Builder::new(grammar.clone()).from("users").filter_eq("name", value.as_str());
            let baseline = Builder::new(grammar).from("users").filter_eq("name", "x");
            prop_assert_eq!(query.to_sql(), baseline.to_sql());
            prop_assert_eq!(query.bindings(), vec![Value::Text(value.clone())]);
        }
    }

    #[test]
    fn quoted_identifiers_escape_their_delimiter(column in identifier_strategy()) {
        let sqlite_quoted = sqlite().wrap_value(&column);
        let inner = &sqlite_quoted[1..sqlite_quoted.len() - 1];
        prop_assert_eq!(inner.replace("\"\"", ""), column.replace('"', ""));

        let mysql_quoted = mysql().wrap_value(&column);
        let inner = &mysql_quoted[1..mysql_quoted.len() - 1];
        prop_assert_eq!(inner.replace("``", ""), column.replace('`', ""));
    }

    #[test]
    fn filter_in_handles_empty_list(column in identifier_strategy()) {
        let query = Builder::new(sqlite()).from("users").filter_in(&column, Vec::<i64>::new());
        prop_assert!(query.to_sql().contains("0 = 1"));
        prop_assert!(query.bindings().is_empty());
    }

    #[test]
    fn table_prefix_applies_once(table in "[a-z_]{1,16}") {
        let grammar: Arc<dyn QueryGrammar> = Arc::new(SqliteQueryGrammar::new("app_"));
        let sql = Builder::new(grammar).from(table.as_str()).to_sql();
        let expected = format!("from \"app_{table}\"");
        prop_assert!(sql.ends_with(&expected));
    }
}
