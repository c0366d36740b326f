use std::env;
use std::io::{self, Cursor};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckloop_contracts::slides::Bitmap;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message as WsMessage, WebSocket};

use crate::config::DeckConfig;

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];
const CHROME_INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/snap/bin/chromium",
];

/// Turns slide HTML into a canonical-size bitmap.
pub trait SlideRenderer {
    fn name(&self) -> &str;
    fn capture(&mut self, html: &str) -> Result<Bitmap>;
    /// Whether the backing process (if any) is still running.
    fn is_alive(&mut self) -> bool;
    fn restart(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Headless Chrome driven over the DevTools protocol. One browser process
/// serves every capture of a run; it is killed on `close` and on drop.
pub struct ChromeRenderer {
    binary: PathBuf,
    extra_args: Vec<String>,
    viewport: (u32, u32),
    output: (u32, u32),
    timeout: Duration,
    scratch: TempDir,
    browser: Option<BrowserInstance>,
    captures: u64,
}

impl ChromeRenderer {
    pub fn launch(config: &DeckConfig) -> Result<Self> {
        let binary = find_chrome_binary(config.chrome_path.as_deref())?;
        let scratch = tempfile::Builder::new()
            .prefix("deckloop-pages-")
            .tempdir()
            .context("failed to create scratch directory")?;
        let mut renderer = Self {
            binary,
            extra_args: config.chrome_args.clone(),
            viewport: (config.viewport_width, config.viewport_height),
            output: (config.capture_width, config.capture_height),
            timeout: config.render_timeout,
            scratch,
            browser: None,
            captures: 0,
        };
        renderer.start_browser()?;
        Ok(renderer)
    }

    fn start_browser(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let profile = tempfile::Builder::new()
            .prefix("deckloop-chrome-")
            .tempdir()
            .context("failed to create browser profile directory")?;
        let mut command = Command::new(&self.binary);
        command
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--hide-scrollbars")
            .arg("--no-first-run")
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg(format!("--window-size={},{}", self.viewport.0, self.viewport.1))
            .args(&self.extra_args)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command
            .spawn()
            .with_context(|| format!("failed to start {}", self.binary.display()))?;
        let mut browser = BrowserInstance {
            child,
            session: None,
            profile,
        };

        let ws_url = browser.wait_for_devtools_url(deadline)?;
        let (mut socket, _) = tungstenite::connect(ws_url.as_str())
            .with_context(|| format!("devtools connect to {ws_url} failed"))?;
        set_socket_read_timeout(&mut socket, Some(SOCKET_POLL_INTERVAL));
        let mut session = CdpSession::new(socket);

        let target = session.call(
            "Target.createTarget",
            json!({"url": "about:blank"}),
            deadline,
        )?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Target.createTarget returned no targetId"))?
            .to_string();
        let attached = session.call(
            "Target.attachToTarget",
            json!({"targetId": target_id, "flatten": true}),
            deadline,
        )?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Target.attachToTarget returned no sessionId"))?
            .to_string();
        session.session_id = Some(session_id);
        session.call("Page.enable", json!({}), deadline)?;
        session.call("Page.setLifecycleEventsEnabled", json!({"enabled": true}), deadline)?;
        session.call(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": self.viewport.0,
                "height": self.viewport.1,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
            deadline,
        )?;

        browser.session = Some(session);
        self.browser = Some(browser);
        Ok(())
    }
}

impl SlideRenderer for ChromeRenderer {
    fn name(&self) -> &str {
        "chrome"
    }

    fn capture(&mut self, html: &str) -> Result<Bitmap> {
        let deadline = Instant::now() + self.timeout;
        self.captures += 1;
        let page_path = self
            .scratch
            .path()
            .join(format!("slide-{:04}.html", self.captures));
        std::fs::write(&page_path, html)
            .with_context(|| format!("failed to write {}", page_path.display()))?;
        let url = reqwest::Url::from_file_path(&page_path)
            .map_err(|_| anyhow!("cannot build file URL for {}", page_path.display()))?;

        let session = self
            .browser
            .as_mut()
            .and_then(|browser| browser.session.as_mut())
            .ok_or_else(|| anyhow!("chrome renderer is not running"))?;
        session.pending_events.clear();
        let navigated = session.call("Page.navigate", json!({"url": url.as_str()}), deadline)?;
        if let Some(error_text) = navigated.get("errorText").and_then(Value::as_str) {
            bail!("navigation to {} failed: {error_text}", page_path.display());
        }
        let loader_id = navigated
            .get("loaderId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Page.navigate returned no loaderId"))?
            .to_string();
        // Events from an earlier, timed-out navigation may still be queued.
        session.wait_event("Page.lifecycleEvent", deadline, |event| {
            is_load_of(event, &loader_id)
        })?;
        let shot = session.call(
            "Page.captureScreenshot",
            json!({"format": "png", "fromSurface": true}),
            deadline,
        )?;
        let data = shot
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Page.captureScreenshot returned no data"))?;
        let bytes = BASE64
            .decode(data)
            .context("screenshot payload is not valid base64")?;
        let _ = std::fs::remove_file(&page_path);
        downscale_png(&bytes, self.output.0, self.output.1)
    }

    fn is_alive(&mut self) -> bool {
        match self.browser.as_mut() {
            Some(browser) => matches!(browser.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.browser = None;
        self.start_browser()
            .with_context(|| format!("failed to restart {}", self.binary.display()))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut browser) = self.browser.take() {
            if let Some(session) = browser.session.as_mut() {
                let deadline = Instant::now() + Duration::from_secs(2);
                session.session_id = None;
                let _ = session.send("Browser.close", json!({}));
                wait_for_exit(&mut browser.child, deadline);
            }
        }
        Ok(())
    }
}

struct BrowserInstance {
    child: Child,
    session: Option<CdpSession>,
    profile: TempDir,
}

impl BrowserInstance {
    fn wait_for_devtools_url(&mut self, deadline: Instant) -> Result<String> {
        let port_file = self.profile.path().join("DevToolsActivePort");
        loop {
            if let Ok(raw) = std::fs::read_to_string(&port_file) {
                if let Some(url) = parse_devtools_port_file(&raw) {
                    return Ok(url);
                }
            }
            if let Ok(Some(status)) = self.child.try_wait() {
                bail!("chrome exited during startup ({status})");
            }
            if Instant::now() >= deadline {
                bail!("chrome did not open a DevTools port in time");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for BrowserInstance {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Flattened-session DevTools client: every page command carries the
/// attached `sessionId` over the browser socket.
struct CdpSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    session_id: Option<String>,
    pending_events: Vec<Value>,
}

impl CdpSession {
    fn new(socket: WebSocket<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            socket,
            next_id: 0,
            session_id: None,
            pending_events: Vec::new(),
        }
    }

    fn send(&mut self, method: &str, params: Value) -> Result<u64> {
        self.next_id += 1;
        let mut message = json!({
            "id": self.next_id,
            "method": method,
            "params": params,
        });
        if let (Some(session_id), Some(obj)) = (&self.session_id, message.as_object_mut()) {
            obj.insert("sessionId".to_string(), Value::String(session_id.clone()));
        }
        let raw = serde_json::to_string(&message).context("failed to serialize devtools command")?;
        self.socket
            .send(WsMessage::Text(raw.into()))
            .with_context(|| format!("failed to send {method}"))?;
        Ok(self.next_id)
    }

    fn call(&mut self, method: &str, params: Value, deadline: Instant) -> Result<Value> {
        let id = self.send(method, params)?;
        loop {
            let message = self
                .read_message(deadline)
                .with_context(|| format!("{method} got no response"))?;
            if message.get("id").and_then(Value::as_u64) == Some(id) {
                if let Some(error) = message.get("error") {
                    bail!("{method} failed: {error}");
                }
                return Ok(message.get("result").cloned().unwrap_or(Value::Null));
            }
            if message.get("method").is_some() {
                self.pending_events.push(message);
            }
        }
    }

    fn wait_event(
        &mut self,
        method: &str,
        deadline: Instant,
        matches: impl Fn(&Value) -> bool,
    ) -> Result<Value> {
        if let Some(pos) = self
            .pending_events
            .iter()
            .position(|event| self.is_own_event(event, method) && matches(event))
        {
            return Ok(self.pending_events.remove(pos));
        }
        loop {
            let message = self
                .read_message(deadline)
                .with_context(|| format!("waiting for {method}"))?;
            if self.is_own_event(&message, method) && matches(&message) {
                return Ok(message);
            }
        }
    }

    fn is_own_event(&self, event: &Value, method: &str) -> bool {
        event.get("method").and_then(Value::as_str) == Some(method)
            && event.get("sessionId").and_then(Value::as_str) == self.session_id.as_deref()
    }

    fn read_message(&mut self, deadline: Instant) -> Result<Value> {
        loop {
            if Instant::now() >= deadline {
                bail!("devtools socket timed out");
            }
            let message = match self.socket.read() {
                Ok(message) => message,
                Err(tungstenite::Error::Io(err))
                    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(err) => return Err(anyhow::Error::new(err).context("devtools read failed")),
            };
            let raw = match message {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                WsMessage::Close(_) => bail!("devtools socket closed"),
                _ => continue,
            };
            let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let method = parsed.get("method").and_then(Value::as_str).unwrap_or_default();
            if matches!(method, "Inspector.targetCrashed" | "Target.targetCrashed") {
                bail!("page crashed during capture");
            }
            return Ok(parsed);
        }
    }
}

/// True for the `load` lifecycle event of the navigation `loader_id`.
fn is_load_of(event: &Value, loader_id: &str) -> bool {
    let params = event.get("params");
    params.and_then(|params| params.get("name")).and_then(Value::as_str) == Some("load")
        && params.and_then(|params| params.get("loaderId")).and_then(Value::as_str)
            == Some(loader_id)
}

fn wait_for_exit(child: &mut Child, deadline: Instant) -> bool {
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

#[allow(unreachable_patterns)]
fn set_socket_read_timeout(ws: &mut WebSocket<MaybeTlsStream<TcpStream>>, timeout: Option<Duration>) {
    match ws.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        _ => {}
    }
}

/// `DevToolsActivePort` holds the port on the first line and the browser
/// target path on the second.
pub fn parse_devtools_port_file(raw: &str) -> Option<String> {
    let mut lines = raw.lines().map(str::trim);
    let port = lines.next()?.parse::<u16>().ok()?;
    let path = lines.next().filter(|line| line.starts_with('/'))?;
    Some(format!("ws://127.0.0.1:{port}{path}"))
}

pub fn find_chrome_binary(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        if let Some(found) = search_path(&path.to_string_lossy()) {
            return Ok(found);
        }
        bail!("configured chrome binary {} not found", path.display());
    }
    for name in CHROME_CANDIDATES {
        if let Some(found) = search_path(name) {
            return Ok(found);
        }
    }
    for raw in CHROME_INSTALL_PATHS {
        let path = PathBuf::from(raw);
        if path.is_file() {
            return Ok(path);
        }
    }
    bail!("no Chrome or Chromium binary found; set DECKLOOP_CHROME")
}

fn search_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Deterministic renderer for tests and offline runs: the bitmap colour is
/// derived from a SHA-256 of the HTML.
pub struct DryrunRenderer {
    width: u32,
    height: u32,
}

impl DryrunRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SlideRenderer for DryrunRenderer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn capture(&mut self, html: &str) -> Result<Bitmap> {
        let mut hasher = Sha256::new();
        hasher.update(html.as_bytes());
        let digest = hasher.finalize();
        let fill = Rgb([digest[0], digest[1], digest[2]]);
        let band = Rgb([digest[3], digest[4], digest[5]]);
        let band_top = self.height * 3 / 4;
        let image = RgbImage::from_fn(self.width, self.height, |_, y| {
            if y >= band_top {
                band
            } else {
                fill
            }
        });
        encode_bitmap(DynamicImage::ImageRgb8(image))
    }

    fn is_alive(&mut self) -> bool {
        true
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Resizes a screenshot to exactly `width`×`height`.
pub fn downscale_png(bytes: &[u8], width: u32, height: u32) -> Result<Bitmap> {
    let image = image::load_from_memory(bytes).context("screenshot is not a decodable image")?;
    encode_bitmap(image.resize_exact(width, height, FilterType::Lanczos3))
}

/// Flat bitmap shown when not even the error slide could be captured.
pub fn placeholder_bitmap(width: u32, height: u32) -> Result<Bitmap> {
    let border = (width.min(height) / 40).max(2);
    let image = RgbImage::from_fn(width, height, |x, y| {
        let edge = x < border || y < border || x >= width.saturating_sub(border) || y >= height.saturating_sub(border);
        if edge {
            Rgb([0xB3, 0x26, 0x1E])
        } else {
            Rgb([0xFD, 0xEC, 0xEA])
        }
    });
    encode_bitmap(DynamicImage::ImageRgb8(image))
}

fn encode_bitmap(image: DynamicImage) -> Result<Bitmap> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(Bitmap {
        width: image.width(),
        height: image.height(),
        png,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;

    use super::{
        downscale_png, find_chrome_binary, is_load_of, parse_devtools_port_file,
        placeholder_bitmap, DryrunRenderer, SlideRenderer,
    };
    use serde_json::json;

    #[test]
    fn dryrun_capture_is_deterministic_per_html() -> Result<()> {
        let mut renderer = DryrunRenderer::new(900, 500);
        let first = renderer.capture("<p>a</p>")?;
        let again = renderer.capture("<p>a</p>")?;
        let other = renderer.capture("<p>b</p>")?;
        assert_eq!(first, again);
        assert_ne!(first.png, other.png);
        assert_eq!((first.width, first.height), (900, 500));
        assert!(renderer.is_alive());
        Ok(())
    }

    #[test]
    fn screenshots_are_resized_to_the_canonical_size() -> Result<()> {
        let mut renderer = DryrunRenderer::new(1920, 1080);
        let screenshot = renderer.capture("<p>wide</p>")?;
        let bitmap = downscale_png(&screenshot.png, 900, 500)?;
        assert_eq!((bitmap.width, bitmap.height), (900, 500));
        let decoded = image::load_from_memory(&bitmap.png)?;
        assert_eq!((decoded.width(), decoded.height()), (900, 500));
        Ok(())
    }

    #[test]
    fn undecodable_screenshot_is_an_error() {
        assert!(downscale_png(b"not a png", 900, 500).is_err());
    }

    #[test]
    fn placeholder_has_requested_size() -> Result<()> {
        let bitmap = placeholder_bitmap(900, 500)?;
        let decoded = image::load_from_memory(&bitmap.png)?.to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [0xB3, 0x26, 0x1E]);
        assert_eq!(decoded.get_pixel(450, 250).0, [0xFD, 0xEC, 0xEA]);
        Ok(())
    }

    #[test]
    fn load_events_of_earlier_navigations_are_ignored() {
        let event = |name: &str, loader: &str| {
            json!({
                "method": "Page.lifecycleEvent",
                "params": {"frameId": "F1", "loaderId": loader, "name": name},
            })
        };
        assert!(is_load_of(&event("load", "L2"), "L2"));
        assert!(!is_load_of(&event("load", "L1"), "L2"));
        assert!(!is_load_of(&event("DOMContentLoaded", "L2"), "L2"));
        assert!(!is_load_of(&json!({"method": "Page.loadEventFired"}), "L2"));
    }

    #[test]
    fn devtools_port_file_yields_browser_url() {
        assert_eq!(
            parse_devtools_port_file("9222\n/devtools/browser/abc-123\n"),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123".to_string())
        );
        assert_eq!(parse_devtools_port_file("9222\n"), None);
        assert_eq!(parse_devtools_port_file(""), None);
    }

    #[test]
    fn missing_configured_binary_is_reported() {
        let err = find_chrome_binary(Some(Path::new("/nonexistent/deckloop-chrome")))
            .unwrap_err()
            .to_string();
        assert!(err.contains("not found"));
    }
}
