// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based depth viewer
//!
//! Renders the false-color depth field to the terminal using Unicode
//! half-block characters, with a movable reticle, the distance readout and
//! a distance-over-time chart.

use crate::backends::depth::{
    DepthFrame, ScreenSize, ScreenTarget, SyntheticDepthSource, SyntheticScene,
};
use crate::config::{Config, default_snapshot_dir};
use crate::display::{DistanceUnit, ReadoutSnapshot, grade_color};
use crate::session::{RangingSession, SessionOptions};
use crate::shaders::{FieldRenderer, FieldStyle, depth_to_rgba};

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind,
        KeyModifiers, MouseButton, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Chart, Dataset, GraphType, Paragraph, Widget},
};
use std::io::{self, stdout};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Width of the readout/chart column
const PANEL_WIDTH: u16 = 34;

/// Band counts cycled by 'b'
const BAND_STEPS: [u32; 4] = [0, 4, 8, 16];

/// Run the terminal depth viewer
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    let runtime = tokio::runtime::Runtime::new()?;

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, &runtime, config);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Screen regions of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewLayout {
    field: Rect,
    readout: Rect,
    chart: Rect,
    status: Rect,
}

impl ViewLayout {
    fn new(area: Rect) -> Self {
        let [main, status] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(area);
        let [field, panel] =
            Layout::horizontal([Constraint::Min(1), Constraint::Length(PANEL_WIDTH)]).areas(main);
        let [readout, chart] =
            Layout::vertical([Constraint::Length(8), Constraint::Min(3)]).areas(panel);
        Self {
            field,
            readout,
            chart,
            status,
        }
    }
}

/// Where the depth image lands inside the field area
///
/// One terminal cell shows two vertical pixels, so the "screen" the
/// sampler sees is `width x (height * 2)` half-block pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldGeometry {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
}

impl FieldGeometry {
    /// Largest rectangle with the frame's aspect ratio, centered in `area`
    fn fit(area: Rect, frame_width: u32, frame_height: u32) -> Self {
        let frame_aspect = frame_width as f64 / frame_height.max(1) as f64;
        let term_width = area.width as f64;
        let term_height = (area.height * 2) as f64; // *2 because half-blocks

        let (width, height) = if term_width / term_height > frame_aspect {
            // Terminal is wider - fit to height
            let h = term_height;
            let w = h * frame_aspect;
            (w as u16, (h / 2.0) as u16)
        } else {
            // Terminal is taller - fit to width
            let w = term_width;
            let h = w / frame_aspect;
            (w as u16, (h / 2.0) as u16)
        };

        Self {
            x: area.x + area.width.saturating_sub(width) / 2,
            y: area.y + area.height.saturating_sub(height) / 2,
            width,
            height,
        }
    }

    fn screen_size(&self) -> ScreenSize {
        ScreenSize::new(f64::from(self.width), f64::from(self.height) * 2.0)
    }

    /// Screen target at the center of terminal cell `(column, row)`
    fn target_at(&self, column: u16, row: u16) -> Option<ScreenTarget> {
        if column < self.x
            || row < self.y
            || column >= self.x + self.width
            || row >= self.y + self.height
        {
            return None;
        }
        Some(ScreenTarget::new(
            f64::from(column - self.x) + 0.5,
            f64::from(row - self.y) * 2.0 + 1.0,
        ))
    }

    /// Terminal cell showing `target`
    fn cell_of(&self, target: ScreenTarget) -> Option<(u16, u16)> {
        let screen = self.screen_size();
        let inside_x = target.x >= 0.0 && target.x < screen.width;
        let inside_y = target.y >= 0.0 && target.y < screen.height;
        if !(inside_x && inside_y) {
            return None;
        }
        Some((self.x + target.x as u16, self.y + (target.y / 2.0) as u16))
    }
}

/// Keep a target at the same relative position across a screen resize
fn rescale_target(target: ScreenTarget, from: ScreenSize, to: ScreenSize) -> ScreenTarget {
    if !from.is_valid() {
        return to.center();
    }
    ScreenTarget::new(
        target.x * to.width / from.width,
        target.y * to.height / from.height,
    )
}

/// Move `target` by whole half-block pixels, staying on screen
fn nudge_target(target: ScreenTarget, screen: ScreenSize, dx: f64, dy: f64) -> ScreenTarget {
    let max_x = (screen.width - 0.5).max(0.5);
    let max_y = (screen.height - 1.0).max(1.0);
    ScreenTarget::new(
        (target.x + dx).clamp(0.5, max_x),
        (target.y + dy).clamp(1.0, max_y),
    )
}

/// Colorized depth frame ready for display
struct FieldImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl FieldImage {
    fn pixel(&self, x: u32, y: u32) -> Color {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        match self.rgba.get(idx..idx + 3) {
            Some(px) => Color::Rgb(px[0], px[1], px[2]),
            None => Color::Black,
        }
    }
}

/// Turns depth frames into images, on the GPU while one is usable
struct Colorizer {
    renderer: Option<FieldRenderer>,
    style: FieldStyle,
}

impl Colorizer {
    fn new(style: FieldStyle) -> Self {
        let renderer = match pollster::block_on(FieldRenderer::new_offscreen(style)) {
            Ok(renderer) => {
                info!(adapter = %renderer.device_info().adapter_name, "Using GPU depth field");
                Some(renderer)
            }
            Err(e) => {
                warn!(error = %e, "GPU depth field unavailable, using CPU colormap");
                None
            }
        };
        Self { renderer, style }
    }

    fn backend_name(&self) -> &'static str {
        if self.renderer.is_some() { "gpu" } else { "cpu" }
    }

    fn set_style(&mut self, style: FieldStyle) {
        self.style = style;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_style(style);
        }
    }

    fn colorize(&mut self, frame: &DepthFrame) -> FieldImage {
        let (width, height) = (frame.width(), frame.height());
        if let Some(renderer) = self.renderer.as_mut() {
            match pollster::block_on(renderer.render_to_rgba(frame, width, height)) {
                Ok(rgba) => return FieldImage { width, height, rgba },
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "GPU depth field failed, switching to CPU colormap");
                    self.renderer = None;
                }
                Err(e) => debug!(error = %e, "GPU frame skipped"),
            }
        }
        FieldImage {
            width,
            height,
            rgba: depth_to_rgba(frame.depth(), &self.style),
        }
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    runtime: &tokio::runtime::Runtime,
    config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = runtime.enter();

    let scene = SyntheticScene {
        fps: config.synthetic_fps,
        ..SyntheticScene::default()
    };
    let (frame_width, frame_height) = (scene.width, scene.height);

    let size = terminal.size()?;
    let mut layout = ViewLayout::new(Rect::new(0, 0, size.width, size.height));
    let mut geometry = FieldGeometry::fit(layout.field, frame_width, frame_height);

    let options = SessionOptions::from_config(&config, geometry.screen_size());
    let mut session = RangingSession::start(Box::new(SyntheticDepthSource::new(scene)), options)?;
    info!(width = frame_width, height = frame_height, "Terminal viewer started");

    let mut unit = config.unit;
    let mut style = FieldStyle::from_config(&config);
    let mut colorizer = Colorizer::new(style);
    let mut image: Option<FieldImage> = None;
    let mut last_frame: Option<DepthFrame> = None;
    let mut show_help = false;
    let mut status_message = build_status_message(colorizer.backend_name());

    loop {
        // Follow terminal resizes; the target keeps its relative position
        let size = terminal.size()?;
        let new_layout = ViewLayout::new(Rect::new(0, 0, size.width, size.height));
        if new_layout != layout {
            layout = new_layout;
            let new_geometry = FieldGeometry::fit(layout.field, frame_width, frame_height);
            let target = rescale_target(
                session.target(),
                geometry.screen_size(),
                new_geometry.screen_size(),
            );
            geometry = new_geometry;
            session.set_screen_size(geometry.screen_size());
            session.set_target(target);
        }

        if let Some(frame) = session.take_latest_frame() {
            image = Some(colorizer.colorize(&frame));
            last_frame = Some(frame);
        }

        let readout = session.snapshot();
        let target = session.target();

        terminal.draw(|f| {
            let field = FieldWidget {
                image: image.as_ref(),
                geometry,
                reticle: geometry.cell_of(target),
            };
            f.render_widget(field, layout.field);
            f.render_widget(readout_panel(&readout, unit), layout.readout);
            render_chart(&readout, unit, layout.chart, f.buffer_mut());
            f.render_widget(
                StatusBar {
                    message: &status_message,
                },
                layout.status,
            );
        })?;

        // Handle input with timeout for frame updates
        if !event::poll(Duration::from_millis(16))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                // Ctrl+C to quit
                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
                {
                    break;
                }

                let screen = geometry.screen_size();
                let step = match key.code {
                    KeyCode::Left => Some((-1.0, 0.0)),
                    KeyCode::Right => Some((1.0, 0.0)),
                    KeyCode::Up => Some((0.0, -2.0)),
                    KeyCode::Down => Some((0.0, 2.0)),
                    _ => None,
                };
                if let Some((dx, dy)) = step {
                    session.set_target(nudge_target(target, screen, dx, dy));
                    continue;
                }

                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('r') => session.set_target(screen.center()),
                    KeyCode::Char('u') => {
                        unit = unit.toggled();
                        status_message = format!("Unit: {}", unit);
                    }
                    KeyCode::Char('c') => {
                        style.colormap = style.colormap.toggled();
                        colorizer.set_style(style);
                        status_message = format!("Colormap: {:?}", style.colormap);
                    }
                    KeyCode::Char('b') => {
                        let next = BAND_STEPS
                            .iter()
                            .position(|&b| b == style.bands)
                            .map_or(0, |i| (i + 1) % BAND_STEPS.len());
                        style.bands = BAND_STEPS[next];
                        colorizer.set_style(style);
                        status_message = if style.bands == 0 {
                            "Bands: smooth".to_string()
                        } else {
                            format!("Bands: {}", style.bands)
                        };
                    }
                    KeyCode::Char('p') => {
                        show_help = false;
                        if let Some(img) = &image {
                            match save_snapshot(img) {
                                Ok(path) => {
                                    status_message = format!("Saved: {}", path.display());
                                }
                                Err(e) => {
                                    error!("Failed to save snapshot: {}", e);
                                    status_message = format!("Error: {}", e);
                                }
                            }
                        }
                    }
                    KeyCode::Char('h') => {
                        show_help = !show_help;
                        status_message = if show_help {
                            build_help_message()
                        } else {
                            build_status_message(colorizer.backend_name())
                        };
                    }
                    _ => {}
                }

                // Restyled frames are recolored right away instead of on the next frame
                if matches!(key.code, KeyCode::Char('c') | KeyCode::Char('b'))
                    && let Some(frame) = &last_frame
                {
                    image = Some(colorizer.colorize(frame));
                }
            }
            Event::Mouse(mouse)
                if matches!(
                    mouse.kind,
                    MouseEventKind::Down(MouseButton::Left)
                        | MouseEventKind::Drag(MouseButton::Left)
                ) =>
            {
                if let Some(target) = geometry.target_at(mouse.column, mouse.row) {
                    session.set_target(target);
                }
            }
            _ => {}
        }
    }

    runtime.block_on(session.stop());
    Ok(())
}

fn build_status_message(backend: &str) -> String {
    format!(
        "click/arrows aim | 'u' unit | 'c' colors | 'p' snapshot | 'h' help | 'q' quit [{}]",
        backend
    )
}

fn build_help_message() -> String {
    concat!(
        "Click/drag or arrows: move reticle | r: Recenter | u: m/cm | c: Colormap | ",
        "b: Bands | p: Save PNG | q/Ctrl+C: Quit"
    )
    .to_string()
}

/// Save the current field image as a PNG
fn save_snapshot(img: &FieldImage) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let buffer: image::RgbaImage =
        image::ImageBuffer::from_raw(img.width, img.height, img.rgba.clone())
            .ok_or("Failed to create image")?;

    let dir = default_snapshot_dir();
    std::fs::create_dir_all(&dir)?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let filepath = dir.join(format!("DEPTH_{}.png", timestamp));

    buffer.save(&filepath)?;
    info!(path = %filepath.display(), "Snapshot saved");

    Ok(filepath)
}

fn rgb(color: [u8; 3]) -> Color {
    Color::Rgb(color[0], color[1], color[2])
}

fn readout_panel(readout: &ReadoutSnapshot, unit: DistanceUnit) -> Paragraph<'static> {
    let distance_style = match readout.grade {
        Some(grade) => Style::default()
            .fg(rgb(grade_color(grade)))
            .add_modifier(Modifier::BOLD),
        None => Style::default().fg(Color::Gray),
    };
    let mut distance = vec![Span::styled(readout.distance_label(unit), distance_style)];
    if readout.distance_m.is_some() && !readout.live {
        distance.push(Span::styled(" (held)", Style::default().fg(Color::DarkGray)));
    }

    let precision = readout.grade.map_or("--", |g| g.label());
    let velocity = readout
        .velocity_mps
        .map(|v| unit.format_velocity(v))
        .unwrap_or_else(|| "Velocity: --".to_string());
    let miss = readout
        .last_rejection
        .map_or_else(|| "--".to_string(), |r| r.to_string());

    Paragraph::new(vec![
        Line::from(distance),
        Line::from(format!("Precision: {}", precision)),
        Line::from(velocity),
        Line::from(""),
        Line::from(format!(
            "Frames: {} ok / {} miss",
            readout.accepted, readout.rejected
        )),
        Line::from(format!("Last miss: {}", miss)),
    ])
    .block(Block::bordered().title("Range"))
}

fn render_chart(readout: &ReadoutSnapshot, unit: DistanceUnit, area: Rect, buf: &mut Buffer) {
    let points: Vec<(f64, f64)> = readout
        .history
        .iter()
        .map(|p| (p.t_s, f64::from(unit.convert(p.distance_m))))
        .collect();

    let (x_min, x_max) = match (points.first(), points.last()) {
        (Some(first), Some(last)) if last.0 > first.0 => (first.0, last.0),
        (Some(first), _) => (first.0, first.0 + 1.0),
        _ => (0.0, 1.0),
    };
    let (y_min, y_max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.1), hi.max(p.1))
        });
    let (y_min, y_max) = if y_min.is_finite() && y_max > y_min {
        let pad = (y_max - y_min) * 0.1;
        (y_min - pad, y_max + pad)
    } else if y_min.is_finite() {
        (y_min - 1.0, y_min + 1.0)
    } else {
        (0.0, 1.0)
    };

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&points);

    Chart::new(vec![dataset])
        .block(Block::bordered().title(format!("Distance ({})", unit.suffix())))
        .x_axis(
            Axis::default()
                .bounds([x_min, x_max])
                .labels([format!("{:.0}s", x_min), format!("{:.0}s", x_max)])
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds([y_min, y_max])
                .labels([format!("{:.1}", y_min), format!("{:.1}", y_max)])
                .style(Style::default().fg(Color::DarkGray)),
        )
        .render(area, buf);
}

/// Widget that renders the depth field using half-block characters
struct FieldWidget<'a> {
    image: Option<&'a FieldImage>,
    geometry: FieldGeometry,
    reticle: Option<(u16, u16)>,
}

impl Widget for FieldWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(image) = self.image else {
            // No frame yet - show placeholder
            let msg = "Waiting for depth...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, Style::default());
            }
            return;
        };

        let geometry = self.geometry;
        if geometry.width == 0 || geometry.height == 0 {
            return;
        }

        // Scale factors
        let x_scale = image.width as f64 / geometry.width as f64;
        let y_scale = image.height as f64 / (geometry.height * 2) as f64;

        // Each terminal cell represents 2 vertical pixels:
        // - Upper half (▀) colored with fg
        // - Lower half colored with bg
        for ty in 0..geometry.height {
            for tx in 0..geometry.width {
                let term_x = geometry.x + tx;
                let term_y = geometry.y + ty;
                if term_x >= area.x + area.width || term_y >= area.y + area.height {
                    continue;
                }

                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                    cell.set_char('▀');
                    cell.set_fg(image.pixel(src_x, src_y_top));
                    cell.set_bg(image.pixel(src_x, src_y_bottom));
                }
            }
        }

        if let Some(pos) = self.reticle
            && let Some(cell) = buf.cell_mut(pos)
        {
            cell.set_char('✚');
            cell.set_fg(Color::White);
            cell.set_bg(Color::Black);
        }
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        // Render text
        let text: String = self.message.chars().take(area.width as usize).collect();

        buf.set_string(
            area.x,
            area.y,
            text,
            Style::default().fg(Color::White).bg(Color::DarkGray),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_keeps_aspect_and_centers() {
        // 100 columns x 40 rows = 100 x 80 half-block pixels; a 4:3 frame
        // is width-bound at 100 x 75 pixels, i.e. 37 rows
        let geometry = FieldGeometry::fit(Rect::new(0, 0, 100, 40), 256, 192);
        assert_eq!((geometry.width, geometry.height), (100, 37));
        assert_eq!((geometry.x, geometry.y), (0, 1));
        assert_eq!(geometry.screen_size(), ScreenSize::new(100.0, 74.0));

        // Wide terminal: height-bound, centered horizontally
        let geometry = FieldGeometry::fit(Rect::new(0, 0, 200, 30), 256, 192);
        assert_eq!((geometry.width, geometry.height), (80, 30));
        assert_eq!(geometry.x, 60);
    }

    #[test]
    fn test_target_at_and_cell_of_agree() {
        let geometry = FieldGeometry {
            x: 5,
            y: 2,
            width: 40,
            height: 15,
        };
        let target = geometry.target_at(10, 7).unwrap();
        assert_eq!(target, ScreenTarget::new(5.5, 11.0));
        assert_eq!(geometry.cell_of(target), Some((10, 7)));

        assert!(geometry.target_at(4, 7).is_none());
        assert!(geometry.target_at(45, 7).is_none());
        assert!(geometry.target_at(10, 17).is_none());
        assert!(geometry.cell_of(ScreenTarget::new(-1.0, 3.0)).is_none());
    }

    #[test]
    fn test_rescale_target_keeps_relative_position() {
        let from = ScreenSize::new(100.0, 50.0);
        let to = ScreenSize::new(200.0, 100.0);
        let target = rescale_target(ScreenTarget::new(25.0, 10.0), from, to);
        assert_eq!(target, ScreenTarget::new(50.0, 20.0));

        let from_empty = ScreenSize::new(0.0, 0.0);
        assert_eq!(
            rescale_target(ScreenTarget::new(3.0, 3.0), from_empty, to),
            to.center()
        );
    }

    #[test]
    fn test_nudge_target_stays_on_screen() {
        let screen = ScreenSize::new(10.0, 10.0);
        let moved = nudge_target(ScreenTarget::new(0.5, 1.0), screen, -1.0, -2.0);
        assert_eq!(moved, ScreenTarget::new(0.5, 1.0));
        let moved = nudge_target(ScreenTarget::new(5.5, 5.0), screen, 1.0, 2.0);
        assert_eq!(moved, ScreenTarget::new(6.5, 7.0));
    }

    #[test]
    fn test_field_image_pixel_clamps() {
        let image = FieldImage {
            width: 2,
            height: 1,
            rgba: vec![1, 2, 3, 255, 4, 5, 6, 255],
        };
        assert_eq!(image.pixel(0, 0), Color::Rgb(1, 2, 3));
        assert_eq!(image.pixel(9, 9), Color::Rgb(4, 5, 6));
    }
}
