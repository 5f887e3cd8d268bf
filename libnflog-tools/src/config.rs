use std::io;

pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup(&self, k: &str) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k.as_ref())?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k.as_ref())?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k.as_ref())?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables if needed.
    ///
    /// Returns `false` if one of the intermediate keys exists and is not a table.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) -> bool {
        let mut keys: Vec<&str> = k.as_ref().split('.').collect();
        let last = match keys.pop() {
            Some(last) => last,
            None => return false,
        };
        let mut item = &mut self.value;
        for key in keys {
            let table = match item.as_table_mut() {
                Some(table) => table,
                None => return false,
            };
            item = table
                .entry(key.to_owned())
                .or_insert(toml::Value::Table(toml::map::Map::new()));
        }
        match item.as_table_mut() {
            Some(table) => {
                table.insert(last.to_owned(), v.into());
                true
            }
            None => false,
        }
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::from_str::<toml::Table>(&s) {
            Ok(table) => {
                self.value = toml::Value::Table(table);
                Ok(())
            }
            Err(e) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Load configuration failed: {e}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn config_load_and_get() {
        let mut config = Config::default();
        let input = r#"
log_file = "relay.log"

[nflog]
group = 7
copy_range = 64

[relay]
socket_path = "/tmp/aud/nflog_emit.sock"
echo = false
"#;
        config.load_config(input.as_bytes()).expect("valid toml");
        assert_eq!(config.get("log_file"), Some("relay.log"));
        assert_eq!(config.get_usize("nflog.group"), Some(7));
        assert_eq!(config.get_usize("nflog.copy_range"), Some(64));
        assert_eq!(config.get("relay.socket_path"), Some("/tmp/aud/nflog_emit.sock"));
        assert_eq!(config.get_bool("relay.echo"), Some(false));
        assert_eq!(config.get("relay.missing"), None);
        assert_eq!(config.get_usize("relay.socket_path"), None);
    }

    #[test]
    fn config_set_creates_tables() {
        let mut config = Config::default();
        assert!(config.set("nflog.group", 12i64));
        assert!(config.set("relay.echo", true));
        assert_eq!(config.get_usize("nflog.group"), Some(12));
        assert_eq!(config.get_bool("relay.echo"), Some(true));
        // cannot descend into a non-table value
        assert!(!config.set("nflog.group.sub", 1i64));
    }

    #[test]
    fn config_rejects_invalid_toml() {
        let mut config = Config::default();
        assert!(config.load_config("group = = 7".as_bytes()).is_err());
    }
}
