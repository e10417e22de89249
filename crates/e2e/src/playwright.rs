//! Playwright browser automation
//!
//! A browser is a `node` process running an embedded bridge script. The
//! bridge launches one Playwright browser and then answers JSON-line
//! requests on stdin, keeping contexts and pages alive between calls and
//! addressing them by id.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};
use webcheck_common::BrowserKind;

use crate::driver::{
    BrowserDriver, ContextConfig, ContextDriver, Engine, LaunchConfig, PageDriver, RecordingHandle,
};
use crate::error::{E2eError, E2eResult, ResourceKind};

/// Extra time granted to the bridge on top of Playwright's own timeouts
const BRIDGE_GRACE: Duration = Duration::from_secs(5);

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const kind = process.argv[2];
const launchOptions = JSON.parse(process.argv[3]);
const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  let browser;
  try {
    browser = await playwright[kind].launch(launchOptions);
  } catch (error) {
    reply({ id: 0, ok: false, error: String(error && error.message || error) });
    process.exit(1);
  }
  reply({ id: 0, ok: true, result: { version: browser.version() } });

  const contexts = new Map();
  const pages = new Map();
  let next = 1;
  const context = (p) => {
    const c = contexts.get(p.context);
    if (!c) throw new Error('unknown context ' + p.context);
    return c;
  };
  const page = (p) => {
    const pg = pages.get(p.page);
    if (!pg) throw new Error('unknown page ' + p.page);
    return pg;
  };

  const handlers = {
    newContext: async (p) => {
      const options = { viewport: p.viewport };
      if (p.recordVideoDir) options.recordVideo = { dir: p.recordVideoDir, size: p.viewport };
      const c = await browser.newContext(options);
      c.setDefaultTimeout(p.timeout);
      const id = 'context-' + next++;
      contexts.set(id, c);
      return { id };
    },
    newPage: async (p) => {
      const pg = await context(p).newPage();
      const id = 'page-' + next++;
      pages.set(id, pg);
      const video = pg.video();
      return { id, video: video ? await video.path() : null };
    },
    goto: async (p) => { await page(p).goto(p.url); return null; },
    setContent: async (p) => { await page(p).setContent(p.html); return null; },
    click: async (p) => { await page(p).click(p.selector); return null; },
    fill: async (p) => { await page(p).fill(p.selector, p.value); return null; },
    setInputFiles: async (p) => { await page(p).setInputFiles(p.selector, p.files); return null; },
    dispatchEvent: async (p) => { await page(p).dispatchEvent(p.selector, p.type); return null; },
    textContent: async (p) => page(p).textContent(p.selector, { timeout: p.timeout }),
    screenshot: async (p) => { await page(p).screenshot({ path: p.path, fullPage: p.fullPage }); return null; },
    closePage: async (p) => { await page(p).close(); pages.delete(p.page); return null; },
    closeContext: async (p) => { await context(p).close(); contexts.delete(p.context); return null; },
    close: async () => { await browser.close(); return null; },
  };

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    const req = JSON.parse(line);
    try {
      const handler = handlers[req.op];
      if (!handler) throw new Error('unknown op ' + req.op);
      reply({ id: req.id, ok: true, result: await handler(req.params || {}) });
    } catch (error) {
      const timeout = error && error.name === 'TimeoutError';
      reply({ id: req.id, ok: false, timeout, error: String(error && error.message || error) });
    }
    if (req.op === 'close') break;
  }
  process.exit(0);
})();
"#;

/// Playwright engine for one browser kind
pub struct PlaywrightEngine {
    kind: BrowserKind,
}

impl PlaywrightEngine {
    /// Create an engine once `npx playwright` answers
    pub async fn new(kind: BrowserKind) -> E2eResult<Self> {
        if !playwright_available().await {
            return Err(E2eError::EngineUnavailable);
        }
        Ok(Self { kind })
    }
}

async fn playwright_available() -> bool {
    let status = TokioCommand::new("npx")
        .args(["--no-install", "playwright", "--version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("npx unavailable: {}", e);
            false
        }
    }
}

#[async_trait]
impl Engine for PlaywrightEngine {
    fn kind(&self) -> BrowserKind {
        self.kind
    }

    async fn launch(&self, config: &LaunchConfig) -> E2eResult<Box<dyn BrowserDriver>> {
        let bridge = Bridge::spawn(self.kind, config).await?;
        Ok(Box::new(PlaywrightBrowser {
            bridge: Arc::new(bridge),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

struct BridgeIo {
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

/// Connection to the node bridge process
struct Bridge {
    io: tokio::sync::Mutex<BridgeIo>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    timeout: Duration,
    // Keeps the script file alive for the lifetime of the process.
    _script_dir: tempfile::TempDir,
}

impl Bridge {
    async fn spawn(kind: BrowserKind, config: &LaunchConfig) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("webcheck-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let launch_options = json!({
            "headless": config.headless,
            "timeout": config.timeout.as_millis() as u64,
            "slowMo": config.slow_mo.map(|d| d.as_millis() as u64).unwrap_or(0),
        });

        info!(
            "Launching {} (headless: {}, timeout: {:?})",
            kind.as_str(),
            config.headless,
            config.timeout
        );

        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .arg(kind.as_str())
            .arg(launch_options.to_string())
            .env("NODE_PATH", node_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::acquisition(ResourceKind::Browser, format!("failed to spawn node: {}", e)))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(E2eError::acquisition(
                    ResourceKind::Browser,
                    "bridge stdio unavailable",
                ))
            }
        };

        let bridge = Self {
            io: tokio::sync::Mutex::new(BridgeIo {
                stdin,
                lines: BufReader::new(stdout).lines(),
            }),
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            timeout: config.timeout,
            _script_dir: script_dir,
        };

        let handshake = {
            let mut io = bridge.io.lock().await;
            tokio::time::timeout(config.timeout + BRIDGE_GRACE, read_reply(&mut io.lines, 0)).await
        };

        match handshake {
            Ok(Ok(reply)) if reply.ok => {
                debug!("Browser ready: {}", reply.result);
                Ok(bridge)
            }
            Ok(Ok(reply)) => Err(E2eError::acquisition(
                ResourceKind::Browser,
                reply.error.unwrap_or_else(|| "launch failed".into()),
            )),
            Ok(Err(e)) => Err(E2eError::acquisition(ResourceKind::Browser, e)),
            Err(_) => Err(E2eError::acquisition(
                ResourceKind::Browser,
                format!("browser did not start within {:?}", config.timeout),
            )),
        }
    }

    /// Send one request and wait for its reply
    async fn call(&self, op: &str, params: Value) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({ "id": id, "op": op, "params": params });

        let mut io = self.io.lock().await;
        let mut line = request.to_string();
        line.push('\n');
        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| E2eError::Driver(format!("bridge write failed: {}", e)))?;
        io.stdin.flush().await?;

        let reply = tokio::time::timeout(self.timeout + BRIDGE_GRACE, read_reply(&mut io.lines, id))
            .await
            .map_err(|_| E2eError::Timeout {
                what: op.to_string(),
                ms: self.timeout.as_millis() as u64,
            })??;

        if reply.ok {
            Ok(reply.result)
        } else if reply.timeout {
            Err(E2eError::Timeout {
                what: format!("{} ({})", op, reply.error.unwrap_or_default()),
                ms: self.timeout.as_millis() as u64,
            })
        } else {
            Err(E2eError::Driver(format!(
                "{} failed: {}",
                op,
                reply.error.unwrap_or_else(|| "unknown error".into())
            )))
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn shutdown(&self) -> E2eResult<()> {
        let result = self.call("close", Value::Null).await;

        let mut child = self.child.lock();
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill browser bridge: {}", e);
                }
            }
        }

        result.map(|_| ())
    }
}

/// Read lines until the reply for `id` arrives; stale replies are skipped
async fn read_reply(lines: &mut Lines<BufReader<ChildStdout>>, id: u64) -> E2eResult<BridgeReply> {
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| E2eError::Driver("browser bridge exited".into()))?;

        match serde_json::from_str::<BridgeReply>(&line) {
            Ok(reply) if reply.id == id => return Ok(reply),
            Ok(reply) => debug!("Skipping stale bridge reply {}", reply.id),
            Err(_) => debug!("bridge: {}", line),
        }
    }
}

/// `NODE_PATH` extended with the working directory's `node_modules`
fn node_path() -> String {
    let local = std::env::current_dir()
        .map(|d| d.join("node_modules"))
        .unwrap_or_else(|_| PathBuf::from("node_modules"));

    match std::env::var("NODE_PATH") {
        Ok(existing) if !existing.is_empty() => {
            let sep = if cfg!(windows) { ';' } else { ':' };
            format!("{}{}{}", existing, sep, local.display())
        }
        _ => local.display().to_string(),
    }
}

struct PlaywrightBrowser {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl BrowserDriver for PlaywrightBrowser {
    async fn new_context(&self, config: &ContextConfig) -> E2eResult<Box<dyn ContextDriver>> {
        let result = self
            .bridge
            .call(
                "newContext",
                json!({
                    "viewport": { "width": config.viewport.width, "height": config.viewport.height },
                    "recordVideoDir": config.record_video_dir,
                    "timeout": self.bridge.timeout_ms(),
                }),
            )
            .await?;

        let id = string_field(&result, "id")?;
        Ok(Box::new(PlaywrightContext {
            bridge: self.bridge.clone(),
            id,
            recording: Mutex::new(None),
        }))
    }

    async fn close(&self) -> E2eResult<()> {
        self.bridge.shutdown().await
    }
}

struct PlaywrightContext {
    bridge: Arc<Bridge>,
    id: String,
    recording: Mutex<Option<RecordingHandle>>,
}

#[async_trait]
impl ContextDriver for PlaywrightContext {
    async fn new_page(&self) -> E2eResult<Box<dyn PageDriver>> {
        let result = self
            .bridge
            .call("newPage", json!({ "context": self.id }))
            .await?;

        let id = string_field(&result, "id")?;

        // The first page's video is the context's recording.
        if let Some(video) = result.get("video").and_then(Value::as_str) {
            let mut recording = self.recording.lock();
            if recording.is_none() {
                *recording = Some(RecordingHandle::new(video));
            }
        }

        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            id,
        }))
    }

    fn recording(&self) -> Option<RecordingHandle> {
        self.recording.lock().clone()
    }

    async fn close(&self) -> E2eResult<()> {
        self.bridge
            .call("closeContext", json!({ "context": self.id }))
            .await
            .map(|_| ())
    }
}

struct PlaywrightPage {
    bridge: Arc<Bridge>,
    id: String,
}

impl PlaywrightPage {
    async fn call(&self, op: &str, mut params: Value) -> E2eResult<Value> {
        if let Value::Object(map) = &mut params {
            map.insert("page".into(), Value::String(self.id.clone()));
        }
        self.bridge.call(op, params).await
    }
}

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        self.call("goto", json!({ "url": url })).await.map(|_| ())
    }

    async fn set_content(&self, html: &str) -> E2eResult<()> {
        self.call("setContent", json!({ "html": html })).await.map(|_| ())
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.call("click", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.call("fill", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> E2eResult<()> {
        self.call("setInputFiles", json!({ "selector": selector, "files": files }))
            .await
            .map(|_| ())
    }

    async fn dispatch_event(&self, selector: &str, event_type: &str) -> E2eResult<()> {
        self.call("dispatchEvent", json!({ "selector": selector, "type": event_type }))
            .await
            .map(|_| ())
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        // Short per-poll timeout; callers poll until their own deadline.
        let result = self
            .call("textContent", json!({ "selector": selector, "timeout": 1000 }))
            .await?;
        Ok(result.as_str().map(str::to_string))
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.call("screenshot", json!({ "path": path, "fullPage": full_page }))
            .await
            .map(|_| ())
    }

    async fn close(&self) -> E2eResult<()> {
        self.call("closePage", json!({})).await.map(|_| ())
    }
}

fn string_field(value: &Value, key: &str) -> E2eResult<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| E2eError::Driver(format!("bridge reply missing {:?}: {}", key, value)))
}
