//! Small helpers shared across pipeline stages.

use std::collections::BTreeMap;

/// Merge `variables` and `backend` into the environment handed to the run
/// pod. Backend keys win on collision.
#[must_use]
pub fn extract_env_vars(
    variables: &BTreeMap<String, String>,
    backend: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = variables.clone();
    for (key, value) in backend {
        env.insert(key.clone(), value.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_both_maps() {
        let variables = BTreeMap::from([("TF_VAR_env".to_string(), "prod".to_string())]);
        let backend = BTreeMap::from([("provider".to_string(), "aws".to_string())]);

        let env = extract_env_vars(&variables, &backend);
        assert_eq!(env.get("TF_VAR_env").unwrap(), "prod");
        assert_eq!(env.get("provider").unwrap(), "aws");
    }

    #[test]
    fn backend_wins_on_collision() {
        let variables = BTreeMap::from([("region".to_string(), "us-west-2".to_string())]);
        let backend = BTreeMap::from([("region".to_string(), "eu-west-1".to_string())]);

        let env = extract_env_vars(&variables, &backend);
        assert_eq!(env.get("region").unwrap(), "eu-west-1");
    }
}
