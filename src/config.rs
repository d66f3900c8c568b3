use std::path::PathBuf;

pub const DEFAULT_SECRET_KEY: &str = "inventario-dev-secret-change-me";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inventory spreadsheet (`.xlsx`, `.xls`, `.ods` or `.csv`).
    pub inventory_path: PathBuf,
    /// Zero-based row index holding the column headers.
    pub header_row: usize,
    pub database_path: PathBuf,
    pub photo_root: PathBuf,
    pub bind_address: String,
    pub secret_key: String,
    pub admin_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inventory_path: PathBuf::from("INVENTARIO.xlsx"),
            header_row: 2,
            database_path: PathBuf::from("prestamos.db"),
            photo_root: PathBuf::from("fotos"),
            bind_address: "0.0.0.0:8080".to_string(),
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Blank or unparsable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        Config {
            inventory_path: get("INVENTARIO_XLSX")
                .map(PathBuf::from)
                .unwrap_or(defaults.inventory_path),
            header_row: get("INVENTARIO_HEADER_ROW")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.header_row),
            database_path: get("INVENTARIO_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            photo_root: get("INVENTARIO_FOTOS")
                .map(PathBuf::from)
                .unwrap_or(defaults.photo_root),
            bind_address: get("INVENTARIO_BIND").unwrap_or(defaults.bind_address),
            secret_key: get("INVENTARIO_SECRET_KEY").unwrap_or(defaults.secret_key),
            admin_password: get("INVENTARIO_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
        }
    }

    /// Names of settings still carrying their insecure built-in value.
    pub fn insecure_defaults(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.secret_key == DEFAULT_SECRET_KEY {
            names.push("INVENTARIO_SECRET_KEY");
        }
        if self.admin_password == DEFAULT_ADMIN_PASSWORD {
            names.push("INVENTARIO_ADMIN_PASSWORD");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.inventory_path, PathBuf::from("INVENTARIO.xlsx"));
        assert_eq!(config.header_row, 2);
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(
            config.insecure_defaults(),
            vec!["INVENTARIO_SECRET_KEY", "INVENTARIO_ADMIN_PASSWORD"]
        );
    }

    #[test]
    fn overrides_are_applied_and_bad_numbers_ignored() {
        let config = Config::from_lookup(lookup_from(&[
            ("INVENTARIO_XLSX", "data/items.csv"),
            ("INVENTARIO_HEADER_ROW", "not-a-number"),
            ("INVENTARIO_SECRET_KEY", "s3cret"),
            ("INVENTARIO_ADMIN_PASSWORD", "   "),
        ]));
        assert_eq!(config.inventory_path, PathBuf::from("data/items.csv"));
        assert_eq!(config.header_row, 2);
        assert_eq!(config.secret_key, "s3cret");
        assert_eq!(config.admin_password, DEFAULT_ADMIN_PASSWORD);
        assert_eq!(config.insecure_defaults(), vec!["INVENTARIO_ADMIN_PASSWORD"]);
    }
}
