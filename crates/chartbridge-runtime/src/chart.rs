#![forbid(unsafe_code)]

//! Chart panes and subcharts.
//!
//! A [`ChartHandle`] is one addressable object on the surface: creating it
//! allocates an id from the window's generator and emits the constructor
//! script. Subcharts live on the same window, so they share its queue,
//! registry and id generator, and their events resolve against the same
//! handler table.
//!
//! Handlers registered on behalf of a chart capture a [`WeakChart`] so the
//! registry does not keep the chart alive.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chartbridge_core::{BridgeError, Message, Result};

use crate::widget::{
    HorizontalLine, LineHandler, LineStyle, Modifier, TextHandler, ToolBox, TopBar,
};
use crate::window::Window;

/// Where a pane sits relative to its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Left,
    Right,
    Top,
    Bottom,
}

impl Position {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }
}

/// Size and placement of a pane, as fractions of the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartLayout {
    pub width: f64,
    pub height: f64,
    pub position: Position,
    pub autosize: bool,
}

impl Default for ChartLayout {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            position: Position::Left,
            autosize: true,
        }
    }
}

/// Options for [`ChartHandle::create_subchart`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubchartOptions {
    pub layout: ChartLayout,
    /// Chart whose time scale (and crosshair) this subchart follows.
    pub sync_with: Option<String>,
    /// Sync only the crosshair, not the visible range.
    pub sync_crosshairs_only: bool,
    /// Attach a drawing toolbox.
    pub toolbox: bool,
}

impl Default for SubchartOptions {
    fn default() -> Self {
        Self {
            layout: ChartLayout {
                width: 0.5,
                height: 0.5,
                ..ChartLayout::default()
            },
            sync_with: None,
            sync_crosshairs_only: false,
            toolbox: false,
        }
    }
}

impl SubchartOptions {
    /// Follow `chart`'s time scale.
    #[must_use]
    pub fn synced_with(mut self, chart: &ChartHandle) -> Self {
        self.sync_with = Some(chart.id().to_string());
        self
    }

    #[must_use]
    pub fn layout(mut self, layout: ChartLayout) -> Self {
        self.layout = layout;
        self
    }
}

struct ChartInner {
    id: String,
    window: Window,
    topbar: Mutex<Option<TopBar>>,
    toolbox: Mutex<Option<ToolBox>>,
    /// Live horizontal lines by id; an entry leaves only on `delete`.
    lines: Mutex<BTreeMap<String, HorizontalLine>>,
}

/// Handle on one chart pane. Cheap to clone.
#[derive(Clone)]
pub struct ChartHandle {
    inner: Arc<ChartInner>,
}

/// Non-owning chart reference held by registered handlers.
#[derive(Clone)]
pub struct WeakChart {
    inner: Weak<ChartInner>,
    id: String,
}

impl WeakChart {
    #[must_use]
    pub fn upgrade(&self) -> Option<ChartHandle> {
        let handle = self.inner.upgrade().map(|inner| ChartHandle { inner });
        if handle.is_none() {
            tracing::debug!(chart_id = %self.id, "event for a dropped chart ignored");
        }
        handle
    }
}

impl ChartHandle {
    pub(crate) fn create(window: Window, layout: ChartLayout) -> Result<Self> {
        let id = window.generate_id()?;
        window.run_script(format!(
            "{id} = new Lib.Handler({}, {}, {}, {}, {})",
            js_string(&id),
            layout.width,
            layout.height,
            js_string(layout.position.as_str()),
            layout.autosize,
        ))?;
        tracing::debug!(chart_id = %id, "chart created");
        Ok(Self {
            inner: Arc::new(ChartInner {
                id,
                window,
                topbar: Mutex::new(None),
                toolbox: Mutex::new(None),
                lines: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn window(&self) -> &Window {
        &self.inner.window
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.window.is_loaded()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakChart {
        WeakChart {
            inner: Arc::downgrade(&self.inner),
            id: self.inner.id.clone(),
        }
    }

    pub fn run_script(&self, script: impl Into<String>) -> Result<()> {
        self.inner.window.run_script(script)
    }

    /// Create a pane on the same surface, sharing registry and id generator.
    ///
    /// Sync statements are queued to run after every other deferred script.
    pub fn create_subchart(&self, options: SubchartOptions) -> Result<ChartHandle> {
        let window = &self.inner.window;
        let sub = ChartHandle::create(window.clone(), options.layout)?;
        if let Some(target) = &options.sync_with {
            window.run_script_last(format!(
                "Lib.Handler.syncCharts({}, {target}, {})",
                sub.id(),
                options.sync_crosshairs_only
            ))?;
        }
        if options.toolbox {
            sub.toolbox()?;
        }
        Ok(sub)
    }

    /// The chart's top bar, created on first use.
    pub fn topbar(&self) -> Result<TopBar> {
        let mut slot = self.inner.topbar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(topbar) = slot.as_ref() {
            return Ok(topbar.clone());
        }
        let topbar = TopBar::create(self)?;
        *slot = Some(topbar.clone());
        Ok(topbar)
    }

    /// The chart's drawing toolbox, created on first use.
    pub fn toolbox(&self) -> Result<ToolBox> {
        let mut slot = self.inner.toolbox.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(toolbox) = slot.as_ref() {
            return Ok(toolbox.clone());
        }
        let toolbox = ToolBox::create(self)?;
        *slot = Some(toolbox.clone());
        Ok(toolbox)
    }

    /// Draw a horizontal line; `handler` fires when the user drags it.
    ///
    /// The chart keeps the line (and its handler) until
    /// [`HorizontalLine::delete`]; the returned handle may be dropped.
    pub fn horizontal_line(
        &self,
        price: f64,
        style: LineStyle,
        handler: Option<LineHandler>,
    ) -> Result<HorizontalLine> {
        let line = HorizontalLine::create(self, price, style, handler)?;
        self.lock_lines().insert(line.id().to_string(), line.clone());
        Ok(line)
    }

    /// Line `id`, if it has not been deleted.
    #[must_use]
    pub fn line(&self, id: &str) -> Option<HorizontalLine> {
        self.lock_lines().get(id).cloned()
    }

    /// Every live line, ordered by id.
    #[must_use]
    pub fn lines(&self) -> Vec<HorizontalLine> {
        self.lock_lines().values().cloned().collect()
    }

    pub(crate) fn forget_line(&self, id: &str) -> bool {
        self.lock_lines().remove(id).is_some()
    }

    fn lock_lines(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, HorizontalLine>> {
        self.inner.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind a keyboard shortcut. Returns the handler key.
    ///
    /// Single alphanumeric keys match on `event.code`; anything else matches
    /// on `event.key`.
    pub fn hotkey(
        &self,
        modifier: Option<Modifier>,
        keys: &[&str],
        handler: impl Into<TextHandler>,
    ) -> Result<String> {
        if keys.is_empty() {
            return Err(BridgeError::InvalidState("hotkey needs at least one key".into()));
        }
        let name = format!(
            "{},{}",
            modifier.map_or("none", Modifier::as_str),
            keys.join("|")
        );
        for key in keys {
            let wire = Message::new(name.as_str()).with_args([*key]).encode()?;
            let mut condition = if key.len() == 1 && key.chars().all(|c| c.is_ascii_alphanumeric()) {
                let code = match key.chars().next() {
                    Some(c) if c.is_ascii_digit() => format!("Digit{c}"),
                    _ => format!("Key{}", key.to_ascii_uppercase()),
                };
                format!("event.code === {}", js_string(&code))
            } else {
                format!("event.key === {}", js_string(key))
            };
            if let Some(m) = modifier {
                condition.push_str(&format!(" && event.{}Key", m.as_str()));
            }
            self.run_script(format!(
                "{id}.commandFunctions.unshift((event) => {{\n    \
                 if ({condition}) {{\n        \
                 event.preventDefault()\n        \
                 window.callbackFunction({wire})\n        \
                 return true\n    \
                 }}\n    \
                 else return false\n\
                 }})",
                id = self.id(),
                wire = js_string(&wire),
            ))?;
        }
        let handler = handler.into().into_handler(self.downgrade());
        self.inner.window.register_handler(name.clone(), handler);
        Ok(name)
    }

    /// Show a search box; `handler` receives the submitted text.
    ///
    /// Events arrive as `search<chartId>`.
    pub fn on_search(&self, handler: impl Into<TextHandler>) -> Result<()> {
        self.run_script(format!("Lib.Handler.makeSearchBox({})", self.id()))?;
        let handler = handler.into().into_handler(self.downgrade());
        self.inner
            .window
            .register_handler(format!("search{}", self.id()), handler);
        Ok(())
    }

    /// Screenshot as the `data:` URL the surface returns.
    pub fn screenshot_data_url(&self) -> Result<String> {
        self.inner.window.evaluate(format!(
            "{}.chart.takeScreenshot().toDataURL()",
            self.id()
        ))
    }

    /// Screenshot as decoded image bytes.
    pub fn screenshot(&self) -> Result<Vec<u8>> {
        let url = self.screenshot_data_url()?;
        decode_data_url(&url)
    }

    /// Fit all data into the viewport.
    pub fn fit(&self) -> Result<()> {
        self.run_script(format!("{}.chart.timeScale().fitContent()", self.id()))
    }
}

impl std::fmt::Debug for ChartHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartHandle")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ChartHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Wrap as a JS string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let Some((_, payload)) = url.split_once(',') else {
        return Err(BridgeError::Frame(format!(
            "screenshot reply is not a data URL ({} bytes)",
            url.len()
        )));
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| BridgeError::Frame(format!("screenshot payload: {e}")))
}
