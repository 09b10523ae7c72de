use crate::config::BridgeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub list: bool,
    pub reload: Vec<usize>,
    pub dispatch: Vec<(String, String)>,
    pub watch_seconds: Option<u64>,
    script_root: Option<PathBuf>,
    debug: Option<bool>,
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            }
            let key = &flag[2..];
            if key == "list" {
                options.list = true;
                continue;
            }
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => options.config = Some(PathBuf::from(value)),
                "script-root" => options.script_root = Some(PathBuf::from(value)),
                "debug" => options.debug = Some(parse_bool_flag("debug", &value)?),
                "reload" => {
                    options
                        .reload
                        .push(value.parse::<usize>().with_context(|| format!("Invalid class index '{value}'"))?);
                }
                "dispatch" => {
                    let (class, callback) = value
                        .split_once(':')
                        .filter(|(class, callback)| !class.is_empty() && !callback.is_empty())
                        .ok_or_else(|| anyhow!("Invalid dispatch '{value}'. Use Class:Callback."))?;
                    options.dispatch.push((class.to_string(), callback.to_string()));
                }
                "watch" => {
                    options.watch_seconds =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid watch duration '{value}'"))?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --script-root, --debug, --list, --reload, \
                     --dispatch, --watch."
                ),
            }
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> BridgeConfigOverrides {
        BridgeConfigOverrides {
            script_root: self.script_root.clone(),
            debug: self.debug,
            watch: self.watch_seconds.map(|_| true),
        }
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_dispatch_and_reload() {
        let args = [
            "app",
            "--config",
            "bridge.json",
            "--dispatch",
            "Gametype:OnTick",
            "--reload",
            "2",
            "--list",
            "--debug",
            "on",
        ];
        let options = CliOptions::parse(args).expect("parse options");
        assert_eq!(options.config, Some(PathBuf::from("bridge.json")));
        assert_eq!(options.dispatch, vec![("Gametype".to_string(), "OnTick".to_string())]);
        assert_eq!(options.reload, vec![2]);
        assert!(options.list);
        assert_eq!(options.config_overrides().debug, Some(true));
    }

    #[test]
    fn watch_enables_watch_override() {
        let options = CliOptions::parse(["app", "--watch", "5", "--script-root", "mods"]).expect("parse options");
        let overrides = options.config_overrides();
        assert_eq!(overrides.watch, Some(true));
        assert_eq!(overrides.script_root, Some(PathBuf::from("mods")));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOptions::parse(["app", "--config"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_malformed_dispatch() {
        let err = CliOptions::parse(["app", "--dispatch", "OnTick"]).unwrap_err();
        assert!(err.to_string().contains("Class:Callback"));
    }

    #[test]
    fn rejects_unknown_flags() {
        let err = CliOptions::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
    }
}
