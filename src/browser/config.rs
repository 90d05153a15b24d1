use std::time::Duration;

use crate::config::BrowserSettings;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Launch configuration for the Chrome process
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size
    pub window_size: (u32, u32),

    /// Custom user agent
    pub user_agent: Option<String>,

    /// Navigation timeout
    pub timeout: Duration,

    /// Disable image loading for performance
    pub disable_images: bool,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            timeout: Duration::from_secs(60),
            disable_images: true,
            chrome_flags: stealth_flags(),
        }
    }
}

fn stealth_flags() -> Vec<String> {
    vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-features=IsolateOrigins,site-per-process".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
    ]
}

impl BrowserConfig {
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self {
            headless: settings.headless,
            disable_images: settings.disable_images,
            timeout: Duration::from_secs(settings.timeout_secs),
            ..Self::default()
        }
    }

    /// Every flag passed to Chrome, derived settings included.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.chrome_flags.clone();
        args.push(format!("--window-size={},{}", self.window_size.0, self.window_size.1));
        if self.disable_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.window_size, (1920, 1080));
        assert!(config.user_agent.is_some());
    }

    #[test]
    fn test_launch_args_include_stealth_and_images() {
        let args = BrowserConfig::default().launch_args();
        assert!(args.iter().any(|a| a.contains("AutomationControlled")));
        assert!(args.iter().any(|a| a == "--blink-settings=imagesEnabled=false"));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=")));
    }

    #[test]
    fn test_from_settings() {
        let settings = BrowserSettings {
            headless: false,
            disable_images: false,
            ..BrowserSettings::default()
        };
        let config = BrowserConfig::from_settings(&settings);
        assert!(!config.headless);
        assert!(!config
            .launch_args()
            .iter()
            .any(|a| a.contains("imagesEnabled")));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }
}
