//! Stack configuration resolution
//!
//! The file named by `--config` (or the defaults) is loaded first; flags then
//! override it.

use strata_common::config::StackConfig;
use tracing::debug;

use crate::{Error, GlobalArgs, Result};

/// Load the stack configuration and apply command line overrides
pub fn resolve(global: &GlobalArgs) -> Result<StackConfig> {
    let mut config = match &global.config {
        Some(path) => {
            debug!(path = %path.display(), "loading stack configuration");
            StackConfig::load(path)?
        }
        None => StackConfig::default(),
    };

    if global.local {
        config.local = true;
    }

    if let Some(kubeconfig) = &global.kubeconfig {
        if !kubeconfig.exists() {
            return Err(Error::validation(format!(
                "kubeconfig not found: {}",
                kubeconfig.display()
            )));
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use strata_common::telemetry::LogFormat;

    fn global(config: Option<PathBuf>, local: bool) -> GlobalArgs {
        GlobalArgs {
            config,
            local,
            kubeconfig: None,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(&global(None, false)).unwrap();
        assert_eq!(config, StackConfig::default());
    }

    #[test]
    fn test_local_flag_overrides_file() {
        let path = std::env::temp_dir().join(format!("strata-cli-{}.yaml", std::process::id()));
        std::fs::write(&path, "local: false\ndragonfly:\n  replicas: 2\n").unwrap();
        let config = resolve(&global(Some(path.clone()), true));
        let _ = std::fs::remove_file(&path);

        let config = config.unwrap();
        assert!(config.local);
        assert_eq!(config.dragonfly.replicas, 2);
    }

    #[test]
    fn test_missing_kubeconfig_rejected() {
        let mut args = global(None, true);
        args.kubeconfig = Some(PathBuf::from("/nonexistent/strata/kubeconfig"));
        assert!(matches!(resolve(&args), Err(Error::Validation { .. })));
    }
}
