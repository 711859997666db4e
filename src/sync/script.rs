//! Script resolution
//!
//! A script is given either inline or as a ConfigMap key. Inline wins when
//! both are populated; an empty inline string does not count.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::Client;

use crate::crds::{Scripts, ScriptSource};
use crate::types::{Error, Result};

/// Pick the script for the operation: destroy while finalizing, apply
/// otherwise.
#[must_use]
pub fn select(scripts: &Scripts, finalizing: bool) -> &ScriptSource {
    if finalizing {
        &scripts.destroy
    } else {
        &scripts.apply
    }
}

enum Classified<'a> {
    Inline(&'a str),
    ConfigMap { name: &'a str, key: &'a str },
}

fn classify(source: &ScriptSource) -> Result<Classified<'_>> {
    if let Some(inline) = source.inline.as_deref() {
        if !inline.is_empty() {
            return Ok(Classified::Inline(inline));
        }
    }

    if let Some(reference) = source.config_map_ref.as_ref() {
        if !reference.name.is_empty() && !reference.key.is_empty() {
            return Ok(Classified::ConfigMap {
                name: &reference.name,
                key: &reference.key,
            });
        }
        return Err(Error::ScriptResolutionFailed(
            "missing name or key in ConfigMap reference".to_string(),
        ));
    }

    Err(Error::NoScript)
}

/// Return the script text, fetching the ConfigMap when needed.
pub async fn resolve(client: &Client, namespace: &str, source: &ScriptSource) -> Result<String> {
    match classify(source)? {
        Classified::Inline(text) => Ok(text.to_string()),
        Classified::ConfigMap { name, key } => {
            let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
            let configmap = configmaps.get(name).await.map_err(|err| {
                Error::ScriptResolutionFailed(format!("ConfigMap {name}: {err}"))
            })?;

            configmap
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .cloned()
                .ok_or_else(|| {
                    Error::ScriptResolutionFailed(format!(
                        "key {key} not found in ConfigMap {name}"
                    ))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ConfigMapKeyRef;

    #[test]
    fn selects_apply_unless_finalizing() {
        let scripts = Scripts {
            apply: ScriptSource {
                inline: Some("terraform apply -auto-approve".to_string()),
                config_map_ref: None,
            },
            destroy: ScriptSource {
                inline: Some("terraform destroy -auto-approve".to_string()),
                config_map_ref: None,
            },
        };

        assert_eq!(
            select(&scripts, false).inline.as_deref(),
            Some("terraform apply -auto-approve")
        );
        assert_eq!(
            select(&scripts, true).inline.as_deref(),
            Some("terraform destroy -auto-approve")
        );
    }

    #[test]
    fn inline_text_wins() {
        let source = ScriptSource {
            inline: Some("echo hi".to_string()),
            config_map_ref: Some(ConfigMapKeyRef {
                name: "scripts".to_string(),
                key: "apply.sh".to_string(),
            }),
        };
        assert!(matches!(classify(&source), Ok(Classified::Inline("echo hi"))));
    }

    #[test]
    fn empty_inline_falls_through_to_configmap() {
        let source = ScriptSource {
            inline: Some(String::new()),
            config_map_ref: Some(ConfigMapKeyRef {
                name: "scripts".to_string(),
                key: "apply.sh".to_string(),
            }),
        };
        assert!(matches!(
            classify(&source),
            Ok(Classified::ConfigMap { name: "scripts", key: "apply.sh" })
        ));
    }

    #[test]
    fn no_source_is_no_script() {
        let source = ScriptSource::default();
        assert!(matches!(classify(&source), Err(Error::NoScript)));
    }

    #[test]
    fn partial_configmap_ref_is_a_resolution_failure() {
        let source = ScriptSource {
            inline: None,
            config_map_ref: Some(ConfigMapKeyRef {
                name: "scripts".to_string(),
                key: String::new(),
            }),
        };
        let err = classify(&source).err().unwrap();
        assert!(matches!(err, Error::ScriptResolutionFailed(_)));
        assert!(err.to_string().contains("missing name or key"));
    }
}
