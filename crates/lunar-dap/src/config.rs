use serde::Deserialize;

fn default_stop_on_entry() -> bool {
    true
}

/// Arguments of the `launch` request. `attach` consumes the same shape:
/// `program` stays required as a sanity field, it is just never loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    pub program: String,
    #[serde(default = "default_stop_on_entry")]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub cpath: Option<String>,
}

pub type AttachConfig = LaunchConfig;
