//! Variable substitution and the internal variable namespace.

use std::collections::BTreeMap;

/// Internal variables injected into the launch overlay so each sub-pipeline
/// can self-identify its place in the cluster.
pub const INTERNAL_CLUSTER_VARIABLES: &[&str] = &[
    "rowmill.cluster.size",
    "rowmill.cluster.master",
    "rowmill.worker.name",
    "rowmill.worker.number",
];

/// Variable name carrying positional argument `n` (1-based).
pub fn argument_variable(n: usize) -> String {
    format!("rowmill.argument.{n}")
}

/// Resolve `${NAME}` references in `template` against `variables`.
/// Unknown references are left verbatim; `$` without `{` passes through.
pub fn substitute(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::substitute;
    use std::collections::BTreeMap;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_references() {
        let v = vars(&[("p1", "42"), ("name", "orders")]);
        assert_eq!(substitute("${name}-${p1}", &v), "orders-42");
    }

    #[test]
    fn leaves_unknown_references_verbatim() {
        let v = vars(&[("p1", "42")]);
        assert_eq!(substitute("${missing}/${p1}", &v), "${missing}/42");
    }

    #[test]
    fn unterminated_reference_passes_through() {
        let v = vars(&[("p1", "42")]);
        assert_eq!(substitute("tail ${p1", &v), "tail ${p1");
    }
}
