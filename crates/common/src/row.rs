use serde::{Deserialize, Serialize};

/// One data row: ordered field name/value pairs.
///
/// Rows are heterogeneous per-row tuples; field order is part of the row
/// layout that safe mode verifies stays stable within a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, overwriting in place when the name already exists so the
    /// layout stays stable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Read a field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Field names in layout order.
    pub fn layout(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Whether two rows share the same field names in the same order.
    pub fn layout_matches(&self, other: &Row) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|((a, _), (b, _))| a == b)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Row;

    #[test]
    fn set_overwrites_in_place_keeping_layout() {
        let mut row = Row::new();
        row.set("id", "1");
        row.set("name", "a");
        row.set("id", "2");
        assert_eq!(row.get("id"), Some("2"));
        assert_eq!(row.layout(), vec!["id", "name"]);
    }

    #[test]
    fn layout_match_is_order_sensitive() {
        let mut a = Row::new();
        a.set("id", "1");
        a.set("name", "x");
        let mut b = Row::new();
        b.set("name", "x");
        b.set("id", "1");
        assert!(!a.layout_matches(&b));
    }
}
