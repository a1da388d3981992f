use super::EntityMeta;

impl EntityMeta {
    /// Whether `key` may be mass assigned.
    pub fn is_fillable(&self, key: &str, unguarded: bool) -> bool {
        if unguarded || self.fillable.iter().any(|fillable| fillable == key) {
            return true;
        }
        if self.is_guarded(key) {
            return false;
        }
        self.fillable.is_empty() && !key.contains('.') && !key.starts_with('_')
    }

    pub fn is_guarded(&self, key: &str) -> bool {
        if self.guarded.is_empty() {
            return false;
        }
        self.guarded
            .iter()
            .any(|guarded| guarded == "*" || guarded.eq_ignore_ascii_case(key))
    }

    /// No fillable list and the `*` guard: every mass assignment is refused.
    pub fn totally_guarded(&self) -> bool {
        self.fillable.is_empty() && self.guarded.len() == 1 && self.guarded[0] == "*"
    }
}
