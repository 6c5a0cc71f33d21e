//! Route Resolver: longest-prefix match from a dotted task name
//! to a queue name.

use std::collections::HashMap;

use crate::error::DispatchError;

/// `module.path::task_name` on the wire is normalized to
/// `module.path.task_name` before matching.
fn normalize_key(key: &str) -> String {
    key.replace("::", ".")
}

/// resolve: longest-prefix match over the dotted task name.
/// Strip the rightmost segment and retry until an exact match is found;
/// fail when nothing matches.
pub fn resolve(task_name: &str, routes: &HashMap<String, String>) -> Result<String, DispatchError> {
    let normalized: HashMap<String, &String> = routes
        .iter()
        .map(|(key, value)| (normalize_key(key), value))
        .collect();

    let mut candidate = task_name;
    loop {
        if let Some(queue) = normalized.get(candidate) {
            return Ok((*queue).clone());
        }
        match candidate.rfind('.') {
            Some(idx) => candidate = &candidate[..idx],
            None => {
                return Err(DispatchError::Configuration(format!(
                    "no route matches task {task_name}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn longest_prefix_wins_regardless_of_insertion_order() {
        let routes = routes(&[("a.b.c.d.e", "Q1"), ("a.b.c", "Q2"), ("a", "Q3")]);
        assert_eq!(resolve("a.b.c.d.e.taskname", &routes).unwrap(), "Q1");
        assert_eq!(resolve("a.b.c.x.taskname", &routes).unwrap(), "Q2");
        assert!(resolve("z.taskname", &routes).is_err());
    }

    #[test]
    fn specific_task_route_beats_module_prefix() {
        let routes = routes(&[("m::do_thing", "SQ"), ("m", "GQ")]);
        assert_eq!(resolve("m.do_thing", &routes).unwrap(), "SQ");
        assert_eq!(resolve("m.other", &routes).unwrap(), "GQ");
    }

    #[test]
    fn empty_routes_always_fail() {
        let routes = HashMap::new();
        assert!(resolve("anything.here", &routes).is_err());
    }

    #[test]
    fn exact_top_level_match() {
        let routes = routes(&[("solo", "Q")]);
        assert_eq!(resolve("solo", &routes).unwrap(), "Q");
    }
}
