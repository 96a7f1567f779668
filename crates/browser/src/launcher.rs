//! Chrome Launcher - spawn a local browser and discover its CDP endpoint
//!
//! Chrome exposes `/json/version` on its remote-debugging port once it is up.
//! We poll that until it answers with a `webSocketDebuggerUrl`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use url::Url;
use uuid::Uuid;

use crate::cdp::protocol::VersionInfo;
use crate::error::{BrowserError, Result};

/// How far past the starting port we look for a free one
const PORT_SEARCH_LIMIT: u16 = 100;

/// Browser window dimensions, shared by the launch flags and the page viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 1000,
        }
    }
}

/// Options for spawning a local Chrome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Chrome binary; platform default when unset
    pub executable: Option<PathBuf>,
    pub port: u16,
    pub window: Viewport,
    pub headless: bool,
    pub devtools: bool,
    pub incognito: bool,
    /// Profile directory; a fresh temp dir when unset
    pub user_data_dir: Option<PathBuf>,
    /// Grace period before the first discovery request
    pub startup_delay: Duration,
    pub discovery_interval: Duration,
    pub discovery_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            port: 9222,
            window: Viewport::default(),
            headless: false,
            devtools: false,
            incognito: true,
            user_data_dir: None,
            startup_delay: Duration::from_millis(2500),
            discovery_interval: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(60),
        }
    }
}

/// A Chrome process we spawned, with its discovered endpoint
pub struct ChromeProcess {
    child: Child,
    pub port: u16,
    pub ws_url: String,
    /// Temp profile we created and should remove on shutdown
    temp_profile: Option<PathBuf>,
}

impl ChromeProcess {
    /// Kill the process and remove any temp profile we created
    pub async fn kill(mut self) -> Result<()> {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill Chrome (pid {:?}): {}", self.child.id(), e);
        }
        if let Some(dir) = self.temp_profile.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::debug!("Could not remove temp profile {:?}: {}", dir, e);
            }
        }
        Ok(())
    }

    /// Wait for the DevTools endpoint. On failure the process is killed and
    /// its temp profile removed.
    async fn discover(mut self, options: &LaunchOptions) -> Result<Self> {
        tokio::time::sleep(options.startup_delay).await;

        let base = format!("http://127.0.0.1:{}", self.port);
        match discover_ws_url(&base, options.discovery_interval, options.discovery_timeout).await {
            Ok(ws_url) => {
                self.ws_url = ws_url;
                Ok(self)
            }
            Err(e) => {
                self.kill().await?;
                Err(e)
            }
        }
    }
}

/// First port at or after `start` that is not already in use by us
pub fn find_available_port(start: u16, active: &[u16]) -> Result<u16> {
    let limit = start.saturating_add(PORT_SEARCH_LIMIT);
    (start..=limit)
        .find(|port| !active.contains(port))
        .ok_or_else(|| BrowserError::Launch("No available ports found".to_string()))
}

/// Ports from `start` onward that something is already listening on, up to
/// the first free one
fn busy_ports(start: u16) -> Vec<u16> {
    (start..=start.saturating_add(PORT_SEARCH_LIMIT))
        .take_while(|port| std::net::TcpListener::bind(("127.0.0.1", *port)).is_err())
        .collect()
}

/// Platform default Chrome location
pub fn default_executable() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    } else if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe")
    } else {
        PathBuf::from("google-chrome")
    }
}

/// Command-line flags for a launch
pub fn launch_args(options: &LaunchOptions, user_data_dir: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", options.port),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!(
            "--window-size={},{}",
            options.window.width, options.window.height
        ),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];

    if options.incognito {
        args.push("--incognito".to_string());
    }
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if options.devtools {
        args.push("--auto-open-devtools-for-tabs".to_string());
    }

    args
}

/// Spawn Chrome and wait for its DevTools endpoint
pub async fn launch(options: &LaunchOptions) -> Result<ChromeProcess> {
    let executable = options
        .executable
        .clone()
        .unwrap_or_else(default_executable);

    let (user_data_dir, temp_profile) = match &options.user_data_dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let dir = std::env::temp_dir().join(format!("parking-reserver-{}", Uuid::now_v7()));
            (dir.clone(), Some(dir))
        }
    };

    let port = find_available_port(options.port, &busy_ports(options.port))?;
    if port != options.port {
        tracing::info!("Port {} is taken, using {}", options.port, port);
    }
    let options = &LaunchOptions {
        port,
        ..options.clone()
    };

    let args = launch_args(options, &user_data_dir);
    tracing::info!("Running {} {}", executable.display(), args.join(" "));

    let child = Command::new(&executable)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrowserError::Launch(format!("{}: {}", executable.display(), e)))?;

    ChromeProcess {
        child,
        port: options.port,
        ws_url: String::new(),
        temp_profile,
    }
    .discover(options)
    .await
}

/// Poll `<base>/json/version` until Chrome reports its browser WebSocket URL
pub async fn discover_ws_url(base: &str, interval: Duration, timeout: Duration) -> Result<String> {
    let url = Url::parse(base)
        .and_then(|base| base.join("/json/version"))
        .map_err(|e| BrowserError::Launch(format!("Bad DevTools address {}: {}", base, e)))?;
    let http = reqwest::Client::new();

    let attempt = async {
        loop {
            tracing::debug!("Fetching webSocket URL from {}", url);
            match fetch_version(&http, url.as_str()).await {
                Ok(info) => {
                    tracing::info!(browser = %info.browser, "WebSocket URL - {}", info.web_socket_debugger_url);
                    return info.web_socket_debugger_url;
                }
                Err(e) => {
                    tracing::debug!("Request failed, waiting for Chrome to finish launching: {}", e);
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| BrowserError::WaitTimeout {
            what: format!("DevTools endpoint at {}", url),
            timeout,
        })
}

async fn fetch_version(http: &reqwest::Client, url: &str) -> Result<VersionInfo> {
    let info = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<VersionInfo>()
        .await?;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_find_available_port_skips_active() {
        assert_eq!(find_available_port(9222, &[]).unwrap(), 9222);
        assert_eq!(find_available_port(9222, &[9222, 9223]).unwrap(), 9224);
    }

    #[test]
    fn test_find_available_port_gives_up() {
        let active: Vec<u16> = (9222..=9322).collect();
        assert!(matches!(
            find_available_port(9222, &active),
            Err(BrowserError::Launch(_))
        ));
    }

    #[test]
    fn test_launch_args() {
        let options = LaunchOptions {
            window: Viewport {
                width: 1200,
                height: 800,
            },
            ..LaunchOptions::default()
        };
        let args = launch_args(&options, Path::new("/tmp/profile"));

        assert_eq!(args[0], "--remote-debugging-port=9222");
        assert!(args.contains(&"--window-size=1200,800".to_string()));
        assert!(args.contains(&"--incognito".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.contains(&"--auto-open-devtools-for-tabs".to_string()));
    }

    #[test]
    fn test_launch_args_headless_with_devtools() {
        let options = LaunchOptions {
            headless: true,
            devtools: true,
            ..LaunchOptions::default()
        };
        let args = launch_args(&options, Path::new("/tmp/profile"));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--auto-open-devtools-for-tabs".to_string()));
    }

    #[tokio::test]
    async fn test_discovery_times_out_without_chrome() {
        // Port 9 (discard) is never a DevTools endpoint
        let result = discover_ws_url(
            "http://127.0.0.1:9",
            Duration::from_millis(20),
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_discovery_removes_temp_profile() {
        let dir = std::env::temp_dir().join(format!("parking-reserver-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let process = ChromeProcess {
            child,
            port: 9,
            ws_url: String::new(),
            temp_profile: Some(dir.clone()),
        };
        let options = LaunchOptions {
            startup_delay: Duration::ZERO,
            discovery_interval: Duration::from_millis(20),
            discovery_timeout: Duration::from_millis(200),
            ..LaunchOptions::default()
        };

        let result = process.discover(&options).await;

        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        assert!(!dir.exists());
    }

    #[tokio::test]
    #[ignore] // Needs Chrome installed
    async fn test_launch_and_discover() {
        let process = launch(&LaunchOptions {
            headless: true,
            ..LaunchOptions::default()
        })
        .await
        .unwrap();
        assert!(process.ws_url.starts_with("ws://"));
        process.kill().await.unwrap();
    }
}
