//! Command-line surface
//!
//! Arguments may come from the command line, from environment variables for
//! the broker settings, or from argument files referenced as `@path`. An
//! argument file holds whitespace-separated tokens; single quotes, double
//! quotes and backslash escapes work as in a POSIX shell. A `#` is an
//! ordinary character, so `--password #secret` passes the password through.

use crate::config::{
    default_port, generate_client_id, BridgeConfig, BrokerSection, ConfigError, NonJsonMode,
    StatusSection, TopicSection, DEFAULT_KEEP_ALIVE_SECS,
};
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Argument files may reference other argument files up to this depth
pub const MAX_ARG_FILE_DEPTH: usize = 8;

/// Read JSON objects from stdin and publish them to MQTT
#[derive(Parser, Debug, Clone)]
#[command(name = "json2mqtt")]
#[command(about = "Read JSON objects from stdin and publish them to MQTT.")]
#[command(
    after_help = "Arguments can be passed in a file with the '@' character, e.g. json2mqtt @path/to/args.conf"
)]
#[command(version)]
pub struct Cli {
    /// Hostname or IP address of the MQTT broker
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub broker: String,

    /// MQTT broker port (default: 8883 for TLS, 1883 otherwise)
    #[arg(long, env = "MQTT_PORT")]
    pub port: Option<u16>,

    /// Use TLS to connect to the broker
    #[arg(long)]
    pub tls: bool,

    /// MQTT broker login username
    #[arg(long, env = "MQTT_USERNAME")]
    pub username: Option<String>,

    /// MQTT broker login password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Base topic for publishing messages
    #[arg(long, value_name = "TOPIC")]
    pub topic_prefix: String,

    /// Keys whose associated values will be used to create subtopics
    #[arg(long, num_args = 1.., value_name = "KEY")]
    pub topic_keys: Vec<String>,

    /// Subtopic appended to prefix and key/value subtopics
    #[arg(long, value_name = "TOPIC")]
    pub topic_suffix: Option<String>,

    /// Publish messages with the retain flag set
    #[arg(long)]
    pub retain: bool,

    /// Topic to which to publish online/offline status messages
    #[arg(long, value_name = "TOPIC")]
    pub status_topic: Option<String>,

    /// Do not publish status messages with the retain flag set
    #[arg(long = "no-retain-status")]
    pub no_retain_status: bool,

    /// Action to take when non-JSON objects are received on stdin
    #[arg(long, value_enum, default_value_t = NonJsonMode::Print)]
    pub nonjson: NonJsonMode,

    /// QoS level for published messages
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: u8,

    /// Keep-alive interval in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    pub keep_alive: u64,

    /// MQTT client identifier (default: randomly generated)
    #[arg(long, value_name = "ID")]
    pub client_id: Option<String>,

    /// Print the resolved configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Verbose logging (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse the process arguments, expanding `@file` references first
    pub fn parse_with_arg_files() -> Result<Self, ConfigError> {
        let args = expand_arg_files(std::env::args_os())?;
        Ok(Self::parse_from(args))
    }

    /// Resolve into a validated configuration
    pub fn into_config(self) -> Result<BridgeConfig, ConfigError> {
        let port = self.port.unwrap_or_else(|| default_port(self.tls));

        let config = BridgeConfig {
            nonjson: self.nonjson,
            broker: BrokerSection {
                host: self.broker,
                port,
                tls: self.tls,
                username: self.username,
                password: self.password,
                client_id: self.client_id.unwrap_or_else(generate_client_id),
                keep_alive_secs: self.keep_alive,
            },
            topic: TopicSection {
                prefix: self.topic_prefix,
                keys: self.topic_keys,
                suffix: self.topic_suffix,
                retain: self.retain,
                qos: self.qos,
            },
            status: StatusSection {
                topic: self.status_topic,
                retain: !self.no_retain_status,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

/// Replace every `@path` argument with the tokens read from that file.
///
/// The first argument (program name) is never expanded.
pub fn expand_arg_files<I, T>(args: I) -> Result<Vec<OsString>, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut expanded = Vec::new();
    if let Some(program) = args.next() {
        expanded.push(program);
    }
    for arg in args {
        expand_one(arg, 0, &mut expanded)?;
    }
    Ok(expanded)
}

fn expand_one(arg: OsString, depth: usize, out: &mut Vec<OsString>) -> Result<(), ConfigError> {
    let path = match arg.to_str().and_then(|s| s.strip_prefix('@')) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => {
            out.push(arg);
            return Ok(());
        }
    };

    if depth >= MAX_ARG_FILE_DEPTH {
        return Err(ConfigError::ArgFileTooDeep(MAX_ARG_FILE_DEPTH));
    }

    for token in read_arg_file(&path)? {
        expand_one(OsString::from(token), depth + 1, out)?;
    }
    Ok(())
}

fn read_arg_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ArgFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tokens = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line_tokens = split_arg_line(line).map_err(|message| ConfigError::ArgFileSyntax {
            path: path.to_path_buf(),
            message: format!("line {}: {message}", index + 1),
        })?;
        tokens.extend(line_tokens);
    }
    Ok(tokens)
}

/// Split one line into tokens using shell quoting rules.
///
/// Single quotes take everything literally, double quotes only allow the
/// `\"` and `\\` escapes, and an unquoted backslash escapes the next
/// character. There is no comment syntax.
pub fn split_arg_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["json2mqtt"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_split_plain_tokens() {
        assert_eq!(
            split_arg_line("--broker  mqtt.local\t--retain").unwrap(),
            vec!["--broker", "mqtt.local", "--retain"]
        );
    }

    #[test]
    fn test_split_quoted_tokens() {
        assert_eq!(
            split_arg_line(r#"--topic-prefix "home sensors" --password 'p@ss word'"#).unwrap(),
            vec!["--topic-prefix", "home sensors", "--password", "p@ss word"]
        );
        assert_eq!(
            split_arg_line(r#"a"b c"d 'e'"f""#).unwrap(),
            vec!["ab cd", "ef"]
        );
        assert_eq!(split_arg_line(r#""say \"hi\"""#).unwrap(), vec![r#"say "hi""#]);
        assert_eq!(split_arg_line(r"one\ token").unwrap(), vec!["one token"]);
        assert_eq!(split_arg_line("''").unwrap(), vec![""]);
    }

    #[test]
    fn test_split_hash_is_literal() {
        assert_eq!(
            split_arg_line("--password #secret --topic-prefix a").unwrap(),
            vec!["--password", "#secret", "--topic-prefix", "a"]
        );
        assert_eq!(split_arg_line("a#b # c").unwrap(), vec!["a#b", "#", "c"]);
    }

    #[test]
    fn test_split_double_quote_escapes() {
        assert_eq!(
            split_arg_line(r#""a\\b" "c\$d" "e\nf""#).unwrap(),
            vec![r"a\b", r"c\$d", r"e\nf"]
        );
    }

    #[test]
    fn test_hash_password_reaches_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "--topic-prefix t --username u --password #secret").unwrap();

        let arg = format!("@{}", file.path().display());
        let expanded = expand_arg_files(["json2mqtt", arg.as_str()]).unwrap();
        let config = Cli::try_parse_from(expanded).unwrap().into_config().unwrap();
        assert_eq!(config.broker.password.as_deref(), Some("#secret"));
    }

    #[test]
    fn test_split_errors() {
        assert!(split_arg_line("'open").is_err());
        assert!(split_arg_line("\"open").is_err());
        assert!(split_arg_line("end\\").is_err());
    }

    #[test]
    fn test_expand_arg_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "--broker broker.example --tls").unwrap();
        writeln!(file, "--topic-prefix 'rtl 433'").unwrap();
        writeln!(file, "--topic-keys model id").unwrap();

        let arg = format!("@{}", file.path().display());
        let expanded = expand_arg_files(["json2mqtt", arg.as_str(), "--retain"]).unwrap();
        let expanded: Vec<String> = expanded
            .into_iter()
            .map(|s| s.into_string().unwrap())
            .collect();

        assert_eq!(
            expanded,
            vec![
                "json2mqtt",
                "--broker",
                "broker.example",
                "--tls",
                "--topic-prefix",
                "rtl 433",
                "--topic-keys",
                "model",
                "id",
                "--retain"
            ]
        );
    }

    #[test]
    fn test_program_name_never_expanded() {
        let expanded = expand_arg_files(["@not-a-file", "--retain"]).unwrap();
        assert_eq!(expanded[0], OsString::from("@not-a-file"));
    }

    #[test]
    fn test_missing_arg_file_is_an_error() {
        let result = expand_arg_files(["json2mqtt", "@/definitely/not/here.conf"]);
        assert!(matches!(result, Err(ConfigError::ArgFileRead { .. })));
    }

    #[test]
    fn test_self_referencing_arg_file_is_bounded() {
        let mut file = NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();
        writeln!(file, "@{path}").unwrap();

        let arg = format!("@{path}");
        let result = expand_arg_files(["json2mqtt", arg.as_str()]);
        assert!(matches!(result, Err(ConfigError::ArgFileTooDeep(_))));
    }

    #[test]
    fn test_port_defaults_follow_tls() {
        let config = parse(&["--topic-prefix", "t"]).into_config().unwrap();
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.tls);

        let config = parse(&["--topic-prefix", "t", "--tls"]).into_config().unwrap();
        assert_eq!(config.broker.port, 8883);

        let config = parse(&["--topic-prefix", "t", "--tls", "--port", "9000"])
            .into_config()
            .unwrap();
        assert_eq!(config.broker.port, 9000);
    }

    #[test]
    fn test_full_argument_set() {
        let config = parse(&[
            "--broker",
            "mqtt.lan",
            "--username",
            "bridge",
            "--password",
            "secret",
            "--topic-prefix",
            "sensors",
            "--topic-keys",
            "model",
            "id",
            "--topic-suffix",
            "state",
            "--retain",
            "--status-topic",
            "sensors/bridge",
            "--no-retain-status",
            "--nonjson",
            "error",
            "--qos",
            "1",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.broker.host, "mqtt.lan");
        assert_eq!(config.broker.username.as_deref(), Some("bridge"));
        assert_eq!(config.broker.password.as_deref(), Some("secret"));
        assert_eq!(config.topic.prefix, "sensors");
        assert_eq!(config.topic.keys, vec!["model", "id"]);
        assert_eq!(config.topic.suffix.as_deref(), Some("state"));
        assert!(config.topic.retain);
        assert_eq!(config.topic.qos, 1);
        assert_eq!(config.status.topic.as_deref(), Some("sensors/bridge"));
        assert!(!config.status.retain);
        assert_eq!(config.nonjson, NonJsonMode::Error);
    }

    #[test]
    fn test_status_retained_by_default() {
        let config = parse(&["--topic-prefix", "t", "--status-topic", "t/status"])
            .into_config()
            .unwrap();
        assert!(config.status.retain);
        assert_eq!(config.nonjson, NonJsonMode::Print);
    }

    #[test]
    fn test_topic_prefix_required() {
        assert!(Cli::try_parse_from(["json2mqtt", "--retain"]).is_err());
    }

    #[test]
    fn test_invalid_nonjson_mode_rejected() {
        assert!(
            Cli::try_parse_from(["json2mqtt", "--topic-prefix", "t", "--nonjson", "drop"]).is_err()
        );
    }

    #[test]
    fn test_qos_out_of_range_rejected() {
        assert!(Cli::try_parse_from(["json2mqtt", "--topic-prefix", "t", "--qos", "3"]).is_err());
    }

    #[test]
    fn test_wildcard_prefix_fails_validation() {
        let result = parse(&["--topic-prefix", "t/#"]).into_config();
        assert!(matches!(result, Err(ConfigError::InvalidTopic { .. })));
    }
}
