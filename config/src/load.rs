use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// File extensions tried, in order, for every configuration layer.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of the environment variables that override file values.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_DESTINATION__BIG_QUERY__TABLE_ID`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration types loadable with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// A layer of file configuration.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn stem(&self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(env) => env.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base configuration"),
            Layer::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Errors returned while loading configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate {layer} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        layer: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load {layer} from `{path}`: {source}")]
    ConfigurationFileLoad {
        layer: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to build configuration: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    /// `APP_ENVIRONMENT` holds an unsupported value.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
///
/// Layers, lowest precedence first: `base.(yaml|yml|json)`, `{environment}.(yaml|yml|json)` and
/// `APP_`-prefixed environment variables with `__` separating nested keys.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&directory, environment)
}

/// Loads `T` from an explicit configuration directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let mut builder = rust_cli_config::Config::builder();
    for layer in [Layer::Base, Layer::Environment(environment)] {
        let path = locate(directory, layer)?;
        builder = builder.add_source(rust_cli_config::File::from(path.as_path()));
        check_layer(&builder, layer, &path)?;
    }

    let mut env_source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);
    if !T::LIST_PARSE_KEYS.is_empty() {
        env_source = env_source.try_parsing(true).list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            env_source = env_source.with_list_parse_key(key);
        }
    }

    builder
        .add_source(env_source)
        .build()
        .map_err(LoadConfigError::Builder)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn locate(directory: &Path, layer: Layer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.stem())))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the layers added so far so a parse error names the offending file.
fn check_layer(
    builder: &ConfigBuilder<DefaultState>,
    layer: Layer,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            layer: layer.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use super::*;

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        workers: u16,
    }

    impl Config for Sample {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "config-load-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn environment_file_overrides_base() {
        let dir = scratch_dir();
        fs::write(dir.join("base.yaml"), "name: base\nworkers: 2\n").unwrap();
        fs::write(dir.join("prod.json"), r#"{ "workers": 16 }"#).unwrap();

        let sample: Sample = load_config_from(&dir, Environment::Prod).unwrap();

        assert_eq!(sample.name, "base");
        assert_eq!(sample.workers, 16);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_environment_file_lists_attempted_paths() {
        let dir = scratch_dir();
        fs::write(dir.join("base.yml"), "name: base\nworkers: 2\n").unwrap();

        let err = load_config_from::<Sample>(&dir, Environment::Staging).unwrap_err();

        match &err {
            LoadConfigError::ConfigurationFileMissing { attempted, .. } => {
                assert!(attempted.contains("staging.yaml"));
                assert!(attempted.contains("staging.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn malformed_file_names_its_layer() {
        let dir = scratch_dir();
        fs::write(dir.join("base.yaml"), "name: base\nworkers: 2\n").unwrap();
        fs::write(dir.join("dev.json"), "{ not json").unwrap();

        let err = load_config_from::<Sample>(&dir, Environment::Dev).unwrap_err();

        assert!(matches!(err, LoadConfigError::ConfigurationFileLoad { .. }));
        assert!(err.to_string().contains("dev environment configuration"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = std::env::temp_dir().join("config-load-does-not-exist");
        let err = load_config_from::<Sample>(&dir, Environment::Dev).unwrap_err();
        assert!(matches!(err, LoadConfigError::MissingConfigurationDirectory(_)));
    }
}
