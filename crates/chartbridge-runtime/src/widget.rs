#![forbid(unsafe_code)]

//! Widgets and drawings whose construction registers callbacks.
//!
//! Every control here allocates an id, emits the script that builds it on
//! the surface, and registers a handler under that id (or under a symbolic
//! name such as `save_drawings<chartId>`). Value-carrying widgets bind their
//! [`ValueCell`] to the handler, so the dispatch loop stores the new value
//! before the callback runs.
//!
//! Callbacks receive the owning [`ChartHandle`]. Handlers hold only a weak
//! reference to it; events for a dropped chart are ignored.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use chartbridge_core::{BridgeError, Delivery, Handler, Registration, Result, ValueCell};
use serde_json::Value;

use crate::chart::{ChartHandle, WeakChart, js_string};
use crate::window::Window;

// ── Callback wrappers ───────────────────────────────────────────────────

type WidgetFn = Arc<dyn Fn(&ChartHandle) + Send + Sync>;
type TextFn = Arc<dyn Fn(&ChartHandle, &str) + Send + Sync>;
type LineFn = Arc<dyn Fn(&ChartHandle, &HorizontalLine) + Send + Sync>;

fn make_handler(delivery: Delivery, f: impl Fn(chartbridge_core::Invocation) + Send + Sync + 'static) -> Handler {
    match delivery {
        Delivery::Inline => Handler::new(f),
        Delivery::Task => Handler::task(f),
    }
}

/// Callback for a value-carrying widget. Closures convert into an inline
/// handler; use [`WidgetHandler::task`] for background delivery.
#[derive(Clone)]
pub struct WidgetHandler {
    f: WidgetFn,
    delivery: Delivery,
}

impl WidgetHandler {
    pub fn inline(f: impl Fn(&ChartHandle) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Inline,
        }
    }

    pub fn task(f: impl Fn(&ChartHandle) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Task,
        }
    }

    fn into_handler(self, chart: WeakChart, value: ValueCell) -> Handler {
        let f = self.f;
        make_handler(self.delivery, move |_| {
            if let Some(chart) = chart.upgrade() {
                f(&chart);
            }
        })
        .bound_to(value)
    }
}

impl<F> From<F> for WidgetHandler
where
    F: Fn(&ChartHandle) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self::inline(f)
    }
}

/// Callback receiving the event's first argument (search text, hotkey).
#[derive(Clone)]
pub struct TextHandler {
    f: TextFn,
    delivery: Delivery,
}

impl TextHandler {
    pub fn inline(f: impl Fn(&ChartHandle, &str) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Inline,
        }
    }

    pub fn task(f: impl Fn(&ChartHandle, &str) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Task,
        }
    }

    pub(crate) fn into_handler(self, chart: WeakChart) -> Handler {
        let f = self.f;
        make_handler(self.delivery, move |inv| {
            if let Some(chart) = chart.upgrade() {
                f(&chart, inv.arg(0).unwrap_or_default());
            }
        })
    }
}

impl<F> From<F> for TextHandler
where
    F: Fn(&ChartHandle, &str) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self::inline(f)
    }
}

/// Callback fired after a horizontal line was moved.
#[derive(Clone)]
pub struct LineHandler {
    f: LineFn,
    delivery: Delivery,
}

impl LineHandler {
    pub fn inline(f: impl Fn(&ChartHandle, &HorizontalLine) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Inline,
        }
    }

    pub fn task(f: impl Fn(&ChartHandle, &HorizontalLine) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            delivery: Delivery::Task,
        }
    }
}

impl<F> From<F> for LineHandler
where
    F: Fn(&ChartHandle, &HorizontalLine) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self::inline(f)
    }
}

// ── Hotkey modifiers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ctrl => "ctrl",
            Self::Alt => "alt",
            Self::Shift => "shift",
            Self::Meta => "meta",
        }
    }
}

// ── Top bar ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Switcher,
    TextBox,
    Button,
}

struct WidgetInner {
    id: String,
    kind: WidgetKind,
    value: ValueCell,
    window: Window,
    registration: Mutex<Option<Registration>>,
}

/// A top-bar control.
#[derive(Clone)]
pub struct Widget {
    inner: Arc<WidgetInner>,
}

impl Widget {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> WidgetKind {
        self.inner.kind
    }

    /// Current value (selected option, text, or button label).
    #[must_use]
    pub fn value(&self) -> String {
        self.inner.value.get()
    }

    #[must_use]
    pub fn value_cell(&self) -> &ValueCell {
        &self.inner.value
    }

    /// Change the displayed text of a text box or button.
    pub fn set(&self, text: &str) -> Result<()> {
        let target = match self.inner.kind {
            WidgetKind::TextBox => format!("{}.innerText", self.inner.id),
            WidgetKind::Button => format!("{}.elem.innerText", self.inner.id),
            WidgetKind::Switcher => {
                return Err(BridgeError::InvalidState(
                    "switcher values change through user selection".into(),
                ));
            }
        };
        self.inner.value.set(text);
        self.inner
            .window
            .run_script(format!("{target} = {}", js_string(text)))
    }

    /// Forget the widget's handler. Returns `false` if it had none or it was
    /// already replaced.
    pub fn delete(&self) -> bool {
        let registration = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        registration.is_some_and(Registration::release)
    }
}

impl std::fmt::Debug for Widget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Widget")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("value", &self.inner.value)
            .finish()
    }
}

struct TopBarInner {
    id: String,
    chart: WeakChart,
    window: Window,
    widgets: Mutex<HashMap<String, Widget>>,
}

/// Row of controls above a chart, created lazily by [`ChartHandle::topbar`].
#[derive(Clone)]
pub struct TopBar {
    inner: Arc<TopBarInner>,
}

impl TopBar {
    pub(crate) fn create(chart: &ChartHandle) -> Result<Self> {
        let window = chart.window().clone();
        let id = window.generate_id()?;
        window.run_script(format!("{id} = new TopBar({})", chart.id()))?;
        Ok(Self {
            inner: Arc::new(TopBarInner {
                id,
                chart: chart.downgrade(),
                window,
                widgets: Mutex::new(HashMap::new()),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Widget registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Widget> {
        self.inner
            .widgets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Option switcher. `default` falls back to the first option.
    pub fn switcher(
        &self,
        name: &str,
        options: &[&str],
        default: Option<&str>,
        handler: impl Into<WidgetHandler>,
    ) -> Result<Widget> {
        let Some(&first) = options.first() else {
            return Err(BridgeError::InvalidState(format!(
                "switcher {name:?} needs at least one option"
            )));
        };
        let default = default.unwrap_or(first);
        let options_json = serde_json::to_string(options)
            .map_err(|e| BridgeError::Frame(format!("switcher options: {e}")))?;
        self.add(name, WidgetKind::Switcher, default, Some(handler.into()), |id| {
            format!(
                "{id} = {}.makeSwitcher({options_json}, {}, {})",
                self.inner.id,
                js_string(default),
                js_string(id)
            )
        })
    }

    /// Static text.
    pub fn textbox(&self, name: &str, initial: &str) -> Result<Widget> {
        self.add(name, WidgetKind::TextBox, initial, None, |id| {
            format!(
                "{id} = {}.makeTextBoxWidget({})",
                self.inner.id,
                js_string(initial)
            )
        })
    }

    /// Push button whose value is its label.
    pub fn button(
        &self,
        name: &str,
        label: &str,
        separator: bool,
        handler: impl Into<WidgetHandler>,
    ) -> Result<Widget> {
        self.add(name, WidgetKind::Button, label, Some(handler.into()), |id| {
            format!(
                "{id} = {}.makeButton({}, {}, {separator})",
                self.inner.id,
                js_string(label),
                js_string(id)
            )
        })
    }

    fn add(
        &self,
        name: &str,
        kind: WidgetKind,
        initial: &str,
        handler: Option<WidgetHandler>,
        script: impl FnOnce(&str) -> String,
    ) -> Result<Widget> {
        let id = self.inner.window.generate_id()?;
        self.inner.window.run_script(script(&id))?;
        let value = ValueCell::new(initial);
        let registration = handler.map(|h| {
            self.inner.window.registry().register_scoped(
                id.clone(),
                h.into_handler(self.inner.chart.clone(), value.clone()),
            )
        });
        let widget = Widget {
            inner: Arc::new(WidgetInner {
                id,
                kind,
                value,
                window: self.inner.window.clone(),
                registration: Mutex::new(registration),
            }),
        };
        tracing::debug!(widget_id = %widget.id(), name, ?kind, "widget created");
        self.inner
            .widgets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), widget.clone());
        Ok(widget)
    }
}

impl std::fmt::Debug for TopBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopBar")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

// ── Horizontal line ─────────────────────────────────────────────────────

/// Dash pattern, in the charting library's enum order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineDash {
    #[default]
    Solid,
    Dotted,
    Dashed,
    LargeDashed,
    SparseDotted,
}

impl LineDash {
    const fn index(self) -> u8 {
        match self {
            Self::Solid => 0,
            Self::Dotted => 1,
            Self::Dashed => 2,
            Self::LargeDashed => 3,
            Self::SparseDotted => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineStyle {
    pub color: String,
    pub width: u32,
    pub dash: LineDash,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            color: "rgb(122, 146, 202)".into(),
            width: 2,
            dash: LineDash::Solid,
        }
    }
}

struct LineInner {
    id: String,
    chart_id: String,
    chart: WeakChart,
    window: Window,
    price: Mutex<f64>,
    registration: Mutex<Option<Registration>>,
}

/// A draggable horizontal price line.
#[derive(Clone)]
pub struct HorizontalLine {
    inner: Arc<LineInner>,
}

impl HorizontalLine {
    pub(crate) fn create(
        chart: &ChartHandle,
        price: f64,
        style: LineStyle,
        handler: Option<LineHandler>,
    ) -> Result<Self> {
        let window = chart.window().clone();
        let id = window.generate_id()?;
        let callback = if handler.is_some() {
            js_string(&id)
        } else {
            "null".to_string()
        };
        window.run_script(format!(
            "{id} = new HorizontalLine({{price: {price}}}, {{lineColor: {}, lineStyle: {}, width: {}}}, {callback})\n\
             {}.series.attachPrimitive({id})",
            js_string(&style.color),
            style.dash.index(),
            style.width,
            chart.id(),
        ))?;

        let line = Self {
            inner: Arc::new(LineInner {
                id: id.clone(),
                chart_id: chart.id().to_string(),
                chart: chart.downgrade(),
                window: window.clone(),
                price: Mutex::new(price),
                registration: Mutex::new(None),
            }),
        };
        let Some(handler) = handler else {
            return Ok(line);
        };

        let weak_chart = chart.downgrade();
        let weak_line: Weak<LineInner> = Arc::downgrade(&line.inner);
        let f = handler.f;
        let registered = make_handler(handler.delivery, move |inv| {
            let Some(inner) = weak_line.upgrade() else {
                return;
            };
            let raw = inv.arg(0).unwrap_or_default();
            let Ok(price) = raw.trim().parse::<f64>() else {
                tracing::warn!(line_id = %inv.key, value = raw, "non-numeric price from surface");
                return;
            };
            let line = HorizontalLine { inner };
            line.set_price(price);
            if let Some(chart) = weak_chart.upgrade() {
                f(&chart, &line);
            }
        });
        let registration = window.registry().register_scoped(id.clone(), registered);
        *line
            .inner
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(registration);
        window.run_script(format!("{}.toolBox?.addNewDrawing({id})", chart.id()))?;
        Ok(line)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Last known price (updated by drags and [`update`](Self::update)).
    #[must_use]
    pub fn price(&self) -> f64 {
        *self.inner.price.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_price(&self, price: f64) {
        *self.inner.price.lock().unwrap_or_else(|e| e.into_inner()) = price;
    }

    /// Move the line.
    pub fn update(&self, price: f64) -> Result<()> {
        self.inner
            .window
            .run_script(format!("{}.updatePoints({{price: {price}}})", self.inner.id))?;
        self.set_price(price);
        Ok(())
    }

    pub fn label(&self, text: &str) -> Result<()> {
        self.inner
            .window
            .run_script(format!("{}.updateLabel({})", self.inner.id, js_string(text)))
    }

    /// Remove the line from the chart and forget its handler.
    pub fn delete(&self) -> Result<()> {
        let registration = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(registration) = registration {
            registration.release();
        }
        if let Some(chart) = self.inner.chart.upgrade() {
            chart.forget_line(&self.inner.id);
        }
        let (chart, id) = (&self.inner.chart_id, &self.inner.id);
        self.inner.window.run_script(format!(
            "if ({chart}.toolBox) {chart}.toolBox.delete({id})\nelse {id}.detach()"
        ))
    }
}

impl std::fmt::Debug for HorizontalLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizontalLine")
            .field("id", &self.inner.id)
            .field("price", &self.price())
            .finish()
    }
}

// ── Toolbox ─────────────────────────────────────────────────────────────

struct ToolBoxInner {
    chart_id: String,
    window: Window,
    save_under: Mutex<Option<ValueCell>>,
    drawings: Mutex<BTreeMap<String, Value>>,
    _registration: Registration,
}

/// Drawing toolbox. Drawings the user saves are stored under the current
/// value of a chosen widget (typically the symbol text box).
#[derive(Clone)]
pub struct ToolBox {
    inner: Arc<ToolBoxInner>,
}

impl ToolBox {
    pub(crate) fn create(chart: &ChartHandle) -> Result<Self> {
        let window = chart.window().clone();
        let chart_id = chart.id().to_string();
        window.run_script(format!("{chart_id}.toolBox = new ToolBox({chart_id})"))?;

        Ok(Self {
            inner: Arc::new_cyclic(|weak: &Weak<ToolBoxInner>| {
                let weak = weak.clone();
                let handler = Handler::new(move |inv| {
                    if let Some(inner) = weak.upgrade() {
                        ToolBox { inner }.store(inv.arg(0).unwrap_or_default());
                    }
                });
                let registration = window
                    .registry()
                    .register_scoped(format!("save_drawings{chart_id}"), handler);
                ToolBoxInner {
                    chart_id,
                    window: window.clone(),
                    save_under: Mutex::new(None),
                    drawings: Mutex::new(BTreeMap::new()),
                    _registration: registration,
                }
            }),
        })
    }

    /// Save future drawings under `widget`'s value at save time.
    pub fn save_drawings_under(&self, widget: &Widget) {
        *self
            .inner
            .save_under
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(widget.value_cell().clone());
    }

    fn store(&self, raw: &str) {
        let Some(tag) = self
            .inner
            .save_under
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(ValueCell::get)
        else {
            return;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(drawings) => {
                tracing::debug!(chart_id = %self.inner.chart_id, tag = %tag, "drawings saved");
                self.lock_drawings().insert(tag, drawings);
            }
            Err(e) => tracing::warn!(chart_id = %self.inner.chart_id, error = %e, "malformed drawings payload"),
        }
    }

    fn lock_drawings(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.inner
            .drawings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Drawings stored under `tag`.
    #[must_use]
    pub fn drawings(&self, tag: &str) -> Option<Value> {
        self.lock_drawings().get(tag).cloned()
    }

    /// Show the drawings stored under `tag`. No-op when there are none.
    pub fn load_drawings(&self, tag: &str) -> Result<()> {
        let Some(drawings) = self.drawings(tag) else {
            return Ok(());
        };
        let id = &self.inner.chart_id;
        self.inner.window.run_script(format!(
            "if (\"toolBox\" in {id}) {id}.toolBox.loadDrawings({drawings})"
        ))
    }

    /// Replace the stored drawings with the contents of a JSON file.
    pub fn import_drawings(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&text)
            .map_err(|e| BridgeError::Frame(format!("drawings file: {e}")))?;
        *self.lock_drawings() = parsed;
        Ok(())
    }

    /// Write the stored drawings to a JSON file.
    pub fn export_drawings(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(&*self.lock_drawings())
            .map_err(|e| BridgeError::Frame(format!("drawings file: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox")
            .field("chart_id", &self.inner.chart_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartLayout;
    use crate::sink::RecordingSink;
    use chartbridge_core::Invocation;

    fn chart() -> (ChartHandle, RecordingSink) {
        let sink = RecordingSink::new();
        let window = Window::builder(sink.clone()).id_seed(9).build();
        window.on_load().unwrap();
        (window.create_chart(ChartLayout::default()).unwrap(), sink)
    }

    fn fire(chart: &ChartHandle, key: &str, args: &[&str]) {
        let handler = chart.window().resolve_handler(key).unwrap();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        if let Some(cell) = handler.value_cell() {
            cell.set(args.first().cloned().unwrap_or_default());
            handler.invoke(Invocation {
                key: key.into(),
                chart_id: None,
                args: vec![],
            });
        } else {
            handler.invoke(Invocation {
                key: key.into(),
                chart_id: None,
                args,
            });
        }
    }

    #[test]
    fn switcher_defaults_to_first_option() {
        let (chart, sink) = chart();
        let tb = chart.topbar().unwrap();
        let w = tb
            .switcher("tf", &["1m", "5m"], None, |_: &ChartHandle| {})
            .unwrap();
        assert_eq!(w.value(), "1m");
        assert!(sink.scripts().last().unwrap().contains("makeSwitcher([\"1m\",\"5m\"], \"1m\""));
        assert!(tb.get("tf").is_some());
    }

    #[test]
    fn empty_switcher_rejected() {
        let (chart, _) = chart();
        let tb = chart.topbar().unwrap();
        assert!(matches!(
            tb.switcher("tf", &[], None, |_: &ChartHandle| {}),
            Err(BridgeError::InvalidState(_))
        ));
    }

    #[test]
    fn button_value_updates_before_callback() {
        let (chart, _) = chart();
        let seen = Arc::new(Mutex::new(String::new()));
        let sink_seen = Arc::clone(&seen);
        let tb = chart.topbar().unwrap();
        let button = tb
            .button("go", "Go", true, move |c: &ChartHandle| {
                let value = c.topbar().unwrap().get("go").unwrap().value();
                *sink_seen.lock().unwrap() = value;
            })
            .unwrap();
        fire(&chart, button.id(), &["Going"]);
        assert_eq!(*seen.lock().unwrap(), "Going");
    }

    #[test]
    fn textbox_set_updates_value_and_surface() {
        let (chart, sink) = chart();
        let tb = chart.topbar().unwrap();
        let text = tb.textbox("sym", "AAPL").unwrap();
        text.set("TSLA").unwrap();
        assert_eq!(text.value(), "TSLA");
        assert_eq!(
            sink.scripts().last().unwrap(),
            &format!("{}.innerText = \"TSLA\"", text.id())
        );
        assert!(!text.delete());
    }

    #[test]
    fn widget_delete_forgets_handler() {
        let (chart, _) = chart();
        let tb = chart.topbar().unwrap();
        let w = tb.button("b", "B", false, |_: &ChartHandle| {}).unwrap();
        assert!(chart.window().registry().contains(w.id()));
        assert!(w.delete());
        assert!(!chart.window().registry().contains(w.id()));
        assert!(!w.delete());
    }

    #[test]
    fn horizontal_line_tracks_dragged_price() {
        let (chart, sink) = chart();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&hits);
        let line = chart
            .horizontal_line(
                100.0,
                LineStyle::default(),
                Some(LineHandler::inline(move |_, line: &HorizontalLine| {
                    record.lock().unwrap().push(line.price());
                })),
            )
            .unwrap();
        assert!(sink.scripts().iter().any(|s| s.contains("{price: 100}")));
        fire(&chart, line.id(), &["101.5"]);
        fire(&chart, line.id(), &["garbage"]);
        assert_eq!(line.price(), 101.5);
        assert_eq!(*hits.lock().unwrap(), vec![101.5]);

        line.delete().unwrap();
        assert!(chart.window().resolve_handler(line.id()).is_none());
        assert!(chart.line(line.id()).is_none());
    }

    #[test]
    fn dropped_line_handle_keeps_its_handler() {
        let (chart, _) = chart();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&hits);
        let id = chart
            .horizontal_line(
                100.0,
                LineStyle::default(),
                Some(LineHandler::inline(move |_, line: &HorizontalLine| {
                    record.lock().unwrap().push(line.price());
                })),
            )
            .unwrap()
            .id()
            .to_string();
        fire(&chart, &id, &["98.25"]);
        assert_eq!(*hits.lock().unwrap(), vec![98.25]);
        let kept = chart.line(&id).unwrap();
        assert_eq!(kept.price(), 98.25);
        assert_eq!(chart.lines().len(), 1);

        kept.delete().unwrap();
        assert!(chart.window().resolve_handler(&id).is_none());
        assert!(chart.lines().is_empty());
    }

    #[test]
    fn line_without_handler_registers_nothing() {
        let (chart, _) = chart();
        let before = chart.window().registry().len();
        let line = chart.horizontal_line(5.0, LineStyle::default(), None).unwrap();
        assert_eq!(chart.window().registry().len(), before);
        line.update(6.0).unwrap();
        assert_eq!(line.price(), 6.0);
    }

    #[test]
    fn toolbox_saves_under_widget_value_and_round_trips_files() {
        let (chart, sink) = chart();
        let toolbox = chart.toolbox().unwrap();
        let symbol = chart.topbar().unwrap().textbox("symbol", "AAPL").unwrap();
        let key = format!("save_drawings{}", chart.id());

        fire(&chart, &key, &["[{\"type\":\"line\"}]"]);
        assert!(toolbox.drawings("AAPL").is_none());

        toolbox.save_drawings_under(&symbol);
        fire(&chart, &key, &["[{\"type\":\"line\"}]"]);
        assert_eq!(toolbox.drawings("AAPL"), Some(serde_json::json!([{"type": "line"}])));

        toolbox.load_drawings("AAPL").unwrap();
        assert!(sink.scripts().last().unwrap().contains("toolBox.loadDrawings([{\"type\":\"line\"}])"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawings.json");
        toolbox.export_drawings(&path).unwrap();
        let other = chart.create_subchart(Default::default()).unwrap().toolbox().unwrap();
        other.import_drawings(&path).unwrap();
        assert_eq!(other.drawings("AAPL"), toolbox.drawings("AAPL"));
    }
}
