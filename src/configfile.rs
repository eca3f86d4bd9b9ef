// src/configfile.rs
// INI-style printer configuration: `[section]` headers, `key = value` or
// `key: value` options, `#` and `;` comments.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Option '{1}' not found in section '[{0}]'")]
    OptionNotFound(String, String),
    #[error("Failed to parse option '{0}' value '{1}' as {2}")]
    ParseError(String, String, String), // option, value, type_expected
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Cannot read config file {0}: {1}")]
    Io(String, String),
}

#[derive(Debug, Default, Clone)]
pub struct Configfile {
    // section_name -> { option_name -> option_value_as_string }, names lowercased
    data: HashMap<String, HashMap<String, String>>,
    filename: Option<String>,
}

impl Configfile {
    pub fn new(filename: Option<String>) -> Self {
        Configfile {
            data: HashMap::new(),
            filename,
        }
    }

    /// Reads and parses a config file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        let mut cf = Configfile::new(Some(path.display().to_string()));
        cf.parse(&content)?;
        Ok(cf)
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn parse(&mut self, config_content: &str) -> Result<(), ConfigError> {
        self.data.clear();
        let mut current_section_name: Option<String> = None;

        for line_raw in config_content.lines() {
            let line_no_comment = match line_raw.find(|c| c == '#' || c == ';') {
                Some(index) => &line_raw[..index],
                None => line_raw,
            };
            let line = line_no_comment.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let section_name = line[1..line.len() - 1].trim().to_lowercase();
                if section_name.is_empty() {
                    return Err(ConfigError::Syntax("Empty section name found".to_string()));
                }
                self.data.entry(section_name.clone()).or_default();
                current_section_name = Some(section_name);
                continue;
            }

            let Some(section_name) = current_section_name.as_ref() else {
                return Err(ConfigError::Syntax(format!("Line outside of section: {}", line_raw)));
            };
            let Some(split_at) = line.find(|c| c == '=' || c == ':') else {
                return Err(ConfigError::Syntax(format!(
                    "Malformed line in section [{}]: {}",
                    section_name, line_raw
                )));
            };
            let key = line[..split_at].trim().to_lowercase();
            let value = line[split_at + 1..].trim().to_string();
            if key.is_empty() {
                return Err(ConfigError::Syntax(format!("Empty key found in section [{}]", section_name)));
            }
            self.data.entry(section_name.clone()).or_default().insert(key, value);
        }
        Ok(())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.data.contains_key(&section.to_lowercase())
    }

    fn get_raw(&self, section: &str, option: &str) -> Option<&String> {
        self.data
            .get(&section.to_lowercase())
            .and_then(|options| options.get(&option.to_lowercase()))
    }

    pub fn get(&self, section: &str, option: &str, default: Option<&str>) -> Result<String, ConfigError> {
        match (self.get_raw(section, option), default) {
            (Some(v), _) => Ok(v.clone()),
            (None, Some(d)) => Ok(d.to_string()),
            (None, None) => Err(ConfigError::OptionNotFound(section.to_string(), option.to_string())),
        }
    }

    pub fn getfloat(
        &self,
        section: &str,
        option: &str,
        default: Option<f64>,
        minval: Option<f64>,
        maxval: Option<f64>,
    ) -> Result<f64, ConfigError> {
        let parsed_val = match (self.get_raw(section, option), default) {
            (Some(s_val), _) => s_val.parse::<f64>().map_err(|_| {
                ConfigError::ParseError(option.to_string(), s_val.clone(), "float".to_string())
            })?,
            (None, Some(d)) => return Ok(d),
            (None, None) => {
                return Err(ConfigError::OptionNotFound(section.to_string(), option.to_string()))
            }
        };
        check_range(section, option, parsed_val, minval, maxval)?;
        Ok(parsed_val)
    }

    pub fn getint(
        &self,
        section: &str,
        option: &str,
        default: Option<i64>,
        minval: Option<i64>,
        maxval: Option<i64>,
    ) -> Result<i64, ConfigError> {
        let parsed_val = match (self.get_raw(section, option), default) {
            (Some(s_val), _) => s_val.parse::<i64>().map_err(|_| {
                ConfigError::ParseError(option.to_string(), s_val.clone(), "integer".to_string())
            })?,
            (None, Some(d)) => return Ok(d),
            (None, None) => {
                return Err(ConfigError::OptionNotFound(section.to_string(), option.to_string()))
            }
        };
        check_range(section, option, parsed_val, minval, maxval)?;
        Ok(parsed_val)
    }

    pub fn getboolean(&self, section: &str, option: &str, default: Option<bool>) -> Result<bool, ConfigError> {
        match (self.get_raw(section, option), default) {
            (Some(s_val), _) => match s_val.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(ConfigError::ParseError(option.to_string(), s_val.clone(), "boolean".to_string())),
            },
            (None, Some(d)) => Ok(d),
            (None, None) => Err(ConfigError::OptionNotFound(section.to_string(), option.to_string())),
        }
    }

    /// Comma separated list of floats, e.g. `probed = 0.1, 0.0, -0.05`.
    pub fn getfloatlist(&self, section: &str, option: &str) -> Result<Option<Vec<f64>>, ConfigError> {
        let Some(raw) = self.get_raw(section, option) else {
            return Ok(None);
        };
        raw.split(',')
            .map(|item| {
                let item = item.trim();
                item.parse::<f64>().map_err(|_| {
                    ConfigError::ParseError(option.to_string(), item.to_string(), "float".to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    #[cfg(test)]
    pub fn set(&mut self, section: &str, option: &str, value: &str) {
        self.data
            .entry(section.to_lowercase())
            .or_default()
            .insert(option.to_lowercase(), value.to_string());
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    section: &str,
    option: &str,
    value: T,
    minval: Option<T>,
    maxval: Option<T>,
) -> Result<(), ConfigError> {
    if let Some(min) = minval {
        if value < min {
            return Err(ConfigError::ValidationError(format!(
                "Option '{}' in section '[{}]' ({}) must be >= {}",
                option, section, value, min
            )));
        }
    }
    if let Some(max) = maxval {
        if value > max {
            return Err(ConfigError::ValidationError(format!(
                "Option '{}' in section '[{}]' ({}) must be <= {}",
                option, section, value, max
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_parsed_config(content: &str) -> Configfile {
        let mut cf = Configfile::new(None);
        cf.parse(content).unwrap();
        cf
    }

    #[test]
    fn test_parse_simple_config() {
        let content = "[power_panic]\nz_lift = 2\nretract_length:1.5\n\n[stepper_z]\nsteps_per_mm=400";
        let cf = create_parsed_config(content);

        assert_eq!(cf.get("power_panic", "z_lift", None).unwrap(), "2");
        assert_eq!(cf.get("power_panic", "RETRACT_LENGTH", None).unwrap(), "1.5");
        assert_eq!(cf.get("STEPPER_Z", "steps_per_mm", None).unwrap(), "400");
        assert!(cf.has_section("stepper_z"));
        assert!(!cf.has_section("stepper_q"));
    }

    #[test]
    fn test_parse_with_comments_and_whitespace() {
        let content = r#"
# printer geometry
[bed_mesh] ; mesh extents
  min_x = 35.0 # left edge
  max_x:    238.0
  ; min_y = 1.0
[pause]
crash_z_lift = 10
"#;
        let cf = create_parsed_config(content);
        assert_eq!(cf.get("bed_mesh", "min_x", None).unwrap(), "35.0");
        assert_eq!(cf.get("bed_mesh", "max_x", None).unwrap(), "238.0");
        assert!(cf.get("bed_mesh", "min_y", None).is_err());
        assert_eq!(cf.getint("pause", "crash_z_lift", None, None, None).unwrap(), 10);
    }

    #[test]
    fn test_getters_with_defaults() {
        let cf = create_parsed_config("[types]\nmyfloat = 3.5\nmybool = No");
        assert_eq!(cf.getfloat("types", "myfloat", None, None, None).unwrap(), 3.5);
        assert!(!cf.getboolean("types", "mybool", None).unwrap());
        assert_eq!(cf.getfloat("types", "missing", Some(1.25), None, None).unwrap(), 1.25);
        assert_eq!(cf.getfloat("nosection", "missing", Some(2.0), None, None).unwrap(), 2.0);
        assert!(cf.getfloat("types", "missing", None, None, None).is_err());
    }

    #[test]
    fn test_getfloat_with_validation() {
        let cf = create_parsed_config("[validation]\nval = 10.0");
        assert_eq!(cf.getfloat("validation", "val", None, Some(0.0), Some(20.0)).unwrap(), 10.0);
        match cf.getfloat("validation", "val", None, Some(15.0), None) {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("must be >= 15")),
            other => panic!("Expected ValidationError for minval, got {:?}", other),
        }
        match cf.getfloat("validation", "val", None, None, Some(5.0)) {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("must be <= 5")),
            other => panic!("Expected ValidationError for maxval, got {:?}", other),
        }
    }

    #[test]
    fn test_float_list() {
        let cf = create_parsed_config("[bed_mesh]\nprobed = 0.1, 0.0,-0.05");
        assert_eq!(cf.getfloatlist("bed_mesh", "probed").unwrap(), Some(vec![0.1, 0.0, -0.05]));
        assert_eq!(cf.getfloatlist("bed_mesh", "absent").unwrap(), None);
        let bad = create_parsed_config("[bed_mesh]\nprobed = 0.1, x");
        assert!(bad.getfloatlist("bed_mesh", "probed").is_err());
    }

    #[test]
    fn test_parse_errors() {
        let mut cf = Configfile::new(None);
        assert!(cf.parse("[]\nkey=val").is_err());
        assert!(cf.parse("[sec]\n=val").is_err());
        assert!(cf.parse("[sec]\njustavalue").is_err());
        assert!(cf.parse("key=val").is_err());
    }
}
