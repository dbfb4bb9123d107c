use std::path::PathBuf;

use crate::error::{Error, Result};

/// Server configuration, populated from the command line. Frame rate -1
/// free-runs with late-frame tracking, 0 is manual (non-realtime) stepping,
/// positive values pace to that rate.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_address: String,
    pub udp_port: u16,
    pub width: u32,
    pub height: u32,
    pub frame_rate: i32,
    pub num_images: usize,
    pub offscreen: bool,
    pub log_level: u8,
    pub scinth_def_dir: Option<PathBuf>,
    pub vgen_dir: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> ServerOptions {
        ServerOptions {
            bind_address: "127.0.0.1".to_string(),
            udp_port: 5511,
            width: 800,
            height: 600,
            frame_rate: 60,
            num_images: 3,
            offscreen: false,
            log_level: 2,
            scinth_def_dir: None,
            vgen_dir: None,
        }
    }
}

impl ServerOptions {
    /// Parses `--key value` and `--key=value` style flags.
    pub fn parse(args: impl Iterator<Item = String>) -> Result<ServerOptions> {
        let mut options = ServerOptions::default();
        let mut args = args.peekable();
        while let Some(arg) = args.next() {
            let (key, inline_value) = match arg.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut value = |flag: &str| -> Result<String> {
                match inline_value.clone().or_else(|| args.next()) {
                    Some(value) => Ok(value),
                    None => Err(Error::Parse(format!("flag {} requires a value", flag))),
                }
            };
            match key.as_str() {
                "--bind_address" => options.bind_address = value(&key)?,
                "--udp_port" => options.udp_port = parse_number(&key, &value(&key)?)?,
                "--width" => options.width = parse_number(&key, &value(&key)?)?,
                "--height" => options.height = parse_number(&key, &value(&key)?)?,
                "--frame_rate" => options.frame_rate = parse_number(&key, &value(&key)?)?,
                "--num_images" => options.num_images = parse_number(&key, &value(&key)?)?,
                "--offscreen" => match inline_value.as_deref() {
                    None => options.offscreen = true,
                    Some(value) => {
                        options.offscreen = value.parse().map_err(|_| {
                            Error::Parse(format!("flag --offscreen got non-boolean {}", value))
                        })?
                    }
                },
                "--log_level" => options.log_level = parse_number(&key, &value(&key)?)?,
                "--scinth_def_dir" => options.scinth_def_dir = Some(PathBuf::from(value(&key)?)),
                "--vgen_dir" => options.vgen_dir = Some(PathBuf::from(value(&key)?)),
                other => {
                    return Err(Error::Parse(format!("unknown flag {}", other)));
                }
            }
        }

        if options.num_images < 2 {
            return Err(Error::Parse(format!(
                "--num_images must be at least 2, got {}",
                options.num_images
            )));
        }
        if options.frame_rate < -1 {
            return Err(Error::Parse(format!(
                "--frame_rate must be -1, 0 or positive, got {}",
                options.frame_rate
            )));
        }
        if options.log_level > 6 {
            return Err(Error::Parse(format!(
                "--log_level must be 0..6, got {}",
                options.log_level
            )));
        }
        Ok(options)
    }

    /// Maps the 0..6 wire levels onto the log facade, 0 most verbose and
    /// 6 silent.
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Trace,
            1 => log::LevelFilter::Debug,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Warn,
            4 | 5 => log::LevelFilter::Error,
            _ => log::LevelFilter::Off,
        }
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Parse(format!("flag {} got malformed value {}", flag, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ServerOptions> {
        ServerOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults_without_flags() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.udp_port, 5511);
        assert_eq!(options.frame_rate, 60);
        assert_eq!(options.num_images, 3);
        assert!(!options.offscreen);
    }

    #[test]
    fn parses_separate_and_inline_values() {
        let options = parse(&[
            "--udp_port",
            "7770",
            "--width=1920",
            "--height=1080",
            "--offscreen",
            "--frame_rate=-1",
        ])
        .unwrap();
        assert_eq!(options.udp_port, 7770);
        assert_eq!(options.width, 1920);
        assert_eq!(options.height, 1080);
        assert!(options.offscreen);
        assert_eq!(options.frame_rate, -1);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--udp_port", "lots"]).is_err());
        assert!(parse(&["--no_such_flag", "1"]).is_err());
        assert!(parse(&["--num_images", "1"]).is_err());
        assert!(parse(&["--frame_rate", "-2"]).is_err());
        assert!(parse(&["--udp_port"]).is_err());
    }

    #[test]
    fn log_levels_map_to_filters() {
        let mut options = ServerOptions::default();
        options.log_level = 0;
        assert_eq!(options.level_filter(), log::LevelFilter::Trace);
        options.log_level = 6;
        assert_eq!(options.level_filter(), log::LevelFilter::Off);
    }
}
