mod settings;

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use tracing::{debug, warn};

use crate::config::settings::PartialSettings;

pub use settings::{
    BrokerEndpoint, CertSettings, DEFAULT_BROKER_PORT, FabricConfig, PartialCertSettings,
    PartialGeneralSettings, PartialTimeoutSettings,
};

/// Prefix of environment variables layered over the config file,
/// e.g. `DXL_GENERAL__CLIENT_ID` or `DXL_BROKERS__MAIN`.
pub const ENV_PREFIX: &str = "DXL";

/// Loads a `dxlclient.config` file and `DXL_*` environment overrides.
///
/// The file is INI unless its extension names another format. A `.env` file
/// in the working directory is loaded first when present. Values missing from
/// both sources fall back to `FabricConfig::default()`.
pub fn load_config(path: impl AsRef<Path>) -> Result<FabricConfig, ConfigError> {
    let path = path.as_ref();
    let _ = dotenvy::dotenv();

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        _ => FileFormat::Ini,
    };
    let source = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("non UTF-8 config path {path:?}")))?;

    let builder = Config::builder()
        .add_source(File::new(source, format).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    debug!(path = %path.display(), "loaded fabric configuration");

    merge(partial, path.parent())
}

fn merge(partial: PartialSettings, base_dir: Option<&Path>) -> Result<FabricConfig, ConfigError> {
    let default = FabricConfig::default();

    let brokers = partial
        .brokers
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            value.parse::<BrokerEndpoint>().map_err(|e| {
                ConfigError::Message(format!("broker entry '{name}': {e}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if brokers.is_empty() {
        warn!("broker list is empty");
    }

    let certs = partial.certs.unwrap_or_default();
    let resolve = |file: Option<PathBuf>| {
        file.map(|f| resolve_relative(f, base_dir))
            .unwrap_or_default()
    };

    let timeouts = partial.timeouts.unwrap_or_default();

    Ok(FabricConfig {
        client_id: partial
            .general
            .and_then(|g| g.client_id)
            .or(default.client_id),
        brokers,
        certs: CertSettings {
            broker_ca_bundle: resolve(certs.broker_cert_chain),
            cert_file: resolve(certs.cert_file),
            private_key: resolve(certs.private_key),
        },
        connect_timeout_secs: timeouts
            .connect_timeout_secs
            .unwrap_or(default.connect_timeout_secs),
        request_timeout_secs: timeouts
            .request_timeout_secs
            .unwrap_or(default.request_timeout_secs),
        register_timeout_secs: timeouts
            .register_timeout_secs
            .unwrap_or(default.register_timeout_secs),
    })
}

/// Relative certificate paths are looked up next to the config file when
/// they do not exist relative to the working directory.
fn resolve_relative(file: PathBuf, base_dir: Option<&Path>) -> PathBuf {
    if file.is_absolute() || file.is_file() {
        return file;
    }
    match base_dir {
        Some(dir) if dir.join(&file).is_file() => dir.join(file),
        _ => file,
    }
}
