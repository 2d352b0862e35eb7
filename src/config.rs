use serde::{Deserialize, Serialize};

use crate::search;
use crate::storage;

/// Fallback k when a search does not say how many hits it wants
const DEFAULT_TOP_K: usize = 9;
/// Account used when a command names no user
const DEFAULT_USER: &str = "default";

fn default_corpus_file() -> String {
    search::CORPUS_FILE_NAME.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Corpus file name inside the data directory
    #[serde(default = "default_corpus_file")]
    pub corpus_file: String,

    /// How many results a search returns by default
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// User whose collections and favorites commands act on by default
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Encoder name the corpus file must carry. Unset accepts any encoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_file: default_corpus_file(),
            default_top_k: DEFAULT_TOP_K,
            default_user: default_user(),
            encoder: None,
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&mut self) {
        if self.default_top_k == 0 {
            self.default_top_k = 1
        }

        if self.default_user.trim().is_empty() {
            self.default_user = default_user()
        }

        if self.corpus_file.trim().is_empty() {
            self.corpus_file = default_corpus_file()
        }

        // an empty encoder name means no pinning at all
        if matches!(self.encoder.as_deref(), Some(name) if name.trim().is_empty()) {
            self.encoder = None
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let store =
            storage::BackendLocal::new(base_path).expect("could not prepare data directory");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("could not write default config");
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("config is unreadable"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("could not prepare data directory");

        let config_str = serde_yml::to_string(&self).unwrap();
        store
            .write("config.yaml", config_str.as_bytes())
            .expect("could not write config");
    }

    pub fn corpus_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.base_path).join(&self.corpus_file)
    }

    /// Encoder id the corpus file is required to carry, if pinned.
    pub fn expected_encoder_id(&self) -> Option<[u8; 32]> {
        self.encoder.as_deref().map(search::encoder_id)
    }
}
