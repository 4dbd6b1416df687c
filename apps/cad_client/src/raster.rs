//! Character-cell rasterizers
//!
//! One draw unit is one terminal cell. Shapes are sampled at cell centers,
//! strokes are walked with a DDA and text is written one char per cell.

use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex};

use cad_protocol::{Color, DrawBatch, DrawCommand};
use cad_runtime::Rasterizer;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{self, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

const FILL_CHAR: char = '█';
const STROKE_CHAR: char = '*';
const IMAGE_CHAR: char = '▒';
const IMAGE_COLOR: Color = Color::rgb(128, 128, 128);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
}

impl Cell {
    pub const BLANK: Cell = Cell {
        ch: ' ',
        fg: Color::WHITE,
        bg: Color::BLACK,
    };
}

/// 2D affine transform in canvas order (a b c d e f)
#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Transform {
    const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// `self` followed by `local` applied first
    fn then(&self, local: Transform) -> Transform {
        Transform {
            a: self.a * local.a + self.c * local.b,
            b: self.b * local.a + self.d * local.b,
            c: self.a * local.c + self.c * local.d,
            d: self.b * local.c + self.d * local.d,
            e: self.a * local.e + self.c * local.f + self.e,
            f: self.b * local.e + self.d * local.f + self.f,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Style {
    fill: Color,
    stroke: Color,
    transform: Transform,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            fill: Color::WHITE,
            stroke: Color::WHITE,
            transform: Transform::IDENTITY,
        }
    }
}

/// A grid of character cells that draw batches are rasterized into
#[derive(Debug, Clone)]
pub struct CellGrid {
    width: u16,
    height: u16,
    cells: Vec<Cell>,
    style: Style,
    saved: Vec<Style>,
    /// Subpaths in grid coordinates
    path: Vec<Vec<(f32, f32)>>,
}

impl CellGrid {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::BLANK; width as usize * height as usize],
            style: Style::default(),
            saved: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cell(&self, x: u16, y: u16) -> Option<&Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get(y as usize * self.width as usize + x as usize)
    }

    fn reset(&mut self) {
        self.cells.fill(Cell::BLANK);
        self.style = Style::default();
        self.saved.clear();
        self.path.clear();
    }

    /// Rasterize a whole batch onto a blank grid
    pub fn draw(&mut self, batch: &DrawBatch) {
        self.reset();
        for command in &batch.commands {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: &DrawCommand) {
        match command {
            DrawCommand::Clear { color } => self.cells.fill(Cell { bg: *color, ..Cell::BLANK }),
            DrawCommand::Rect { x, y, w, h } => {
                let corners = self.rect_points(*x, *y, *w, *h);
                self.stroke_polyline(&corners, true, self.style.stroke);
            }
            DrawCommand::FillRect { x, y, w, h } => {
                let corners = self.rect_points(*x, *y, *w, *h);
                self.fill_polygon(&corners, FILL_CHAR, self.style.fill);
            }
            DrawCommand::Circle { x, y, radius } => {
                let points = self.circle_points(*x, *y, *radius);
                self.stroke_polyline(&points, true, self.style.stroke);
            }
            DrawCommand::FillCircle { x, y, radius } => {
                let points = self.circle_points(*x, *y, *radius);
                self.fill_polygon(&points, FILL_CHAR, self.style.fill);
            }
            DrawCommand::Line { x1, y1, x2, y2 } => {
                let points = [self.to_grid(*x1, *y1), self.to_grid(*x2, *y2)];
                self.stroke_polyline(&points, false, self.style.stroke);
            }
            DrawCommand::Text { x, y, text } => {
                let (gx, gy) = self.to_grid(*x, *y);
                for (i, ch) in text.chars().enumerate() {
                    self.plot(gx + i as f32, gy, ch, self.style.fill);
                }
            }
            DrawCommand::Image { x, y, w, h, .. } => {
                let corners = self.rect_points(*x, *y, *w, *h);
                self.fill_polygon(&corners, IMAGE_CHAR, IMAGE_COLOR);
            }
            DrawCommand::BeginPath => self.path.clear(),
            DrawCommand::MoveTo { x, y } => {
                let point = self.to_grid(*x, *y);
                self.path.push(vec![point]);
            }
            DrawCommand::LineTo { x, y } => {
                let point = self.to_grid(*x, *y);
                self.current_subpath().push(point);
            }
            DrawCommand::Arc {
                x,
                y,
                radius,
                start_angle,
                end_angle,
            } => {
                let sweep = end_angle - start_angle;
                let steps = (sweep.abs() * radius.abs()).ceil().clamp(4.0, 64.0) as usize;
                let points: Vec<_> = (0..=steps)
                    .map(|i| {
                        let angle = start_angle + sweep * i as f32 / steps as f32;
                        self.to_grid(x + radius * angle.cos(), y + radius * angle.sin())
                    })
                    .collect();
                self.current_subpath().extend(points);
            }
            DrawCommand::ClosePath => {
                if let Some(first) = self.path.last().and_then(|sub| sub.first().copied()) {
                    self.current_subpath().push(first);
                }
            }
            DrawCommand::Fill => {
                let color = self.style.fill;
                for subpath in std::mem::take(&mut self.path) {
                    self.fill_polygon(&subpath, FILL_CHAR, color);
                    self.path.push(subpath);
                }
            }
            DrawCommand::Stroke => {
                let color = self.style.stroke;
                for subpath in std::mem::take(&mut self.path) {
                    self.stroke_polyline(&subpath, false, color);
                    self.path.push(subpath);
                }
            }
            DrawCommand::SetFillColor { color } => self.style.fill = *color,
            DrawCommand::SetStrokeColor { color } => self.style.stroke = *color,
            // Cells have a fixed size
            DrawCommand::SetLineWidth { .. } | DrawCommand::SetFont { .. } => {}
            DrawCommand::Save => self.saved.push(self.style),
            DrawCommand::Restore => {
                if let Some(style) = self.saved.pop() {
                    self.style = style;
                }
            }
            DrawCommand::Translate { x, y } => self.transform_by(Transform {
                e: *x,
                f: *y,
                ..Transform::IDENTITY
            }),
            DrawCommand::Rotate { radians } => {
                let (sin, cos) = radians.sin_cos();
                self.transform_by(Transform {
                    a: cos,
                    b: sin,
                    c: -sin,
                    d: cos,
                    e: 0.0,
                    f: 0.0,
                })
            }
            DrawCommand::Scale { x, y } => self.transform_by(Transform {
                a: *x,
                d: *y,
                ..Transform::IDENTITY
            }),
            DrawCommand::SetTransform { a, b, c, d, e, f } => {
                self.style.transform = Transform {
                    a: *a,
                    b: *b,
                    c: *c,
                    d: *d,
                    e: *e,
                    f: *f,
                }
            }
        }
    }

    fn transform_by(&mut self, local: Transform) {
        self.style.transform = self.style.transform.then(local);
    }

    fn to_grid(&self, x: f32, y: f32) -> (f32, f32) {
        self.style.transform.apply(x, y)
    }

    fn current_subpath(&mut self) -> &mut Vec<(f32, f32)> {
        if self.path.is_empty() {
            self.path.push(Vec::new());
        }
        let last = self.path.len() - 1;
        &mut self.path[last]
    }

    fn rect_points(&self, x: f32, y: f32, w: f32, h: f32) -> [(f32, f32); 4] {
        [
            self.to_grid(x, y),
            self.to_grid(x + w, y),
            self.to_grid(x + w, y + h),
            self.to_grid(x, y + h),
        ]
    }

    fn circle_points(&self, x: f32, y: f32, radius: f32) -> Vec<(f32, f32)> {
        let steps = (radius.abs() * std::f32::consts::TAU).ceil().clamp(8.0, 96.0) as usize;
        (0..steps)
            .map(|i| {
                let angle = std::f32::consts::TAU * i as f32 / steps as f32;
                self.to_grid(x + radius * angle.cos(), y + radius * angle.sin())
            })
            .collect()
    }

    fn plot(&mut self, x: f32, y: f32, ch: char, fg: Color) {
        if fg.a == 0 || !x.is_finite() || !y.is_finite() {
            return;
        }
        let (cx, cy) = (x.floor(), y.floor());
        if cx < 0.0 || cy < 0.0 || cx >= self.width as f32 || cy >= self.height as f32 {
            return;
        }
        let index = cy as usize * self.width as usize + cx as usize;
        if let Some(cell) = self.cells.get_mut(index) {
            cell.ch = ch;
            cell.fg = fg;
        }
    }

    /// Even-odd fill sampled at cell centers
    fn fill_polygon(&mut self, points: &[(f32, f32)], ch: char, color: Color) {
        if points.len() < 3 {
            return;
        }
        let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
        let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for &(x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let x_range = (min_x.floor().max(0.0) as i64)..=(max_x.ceil().min(self.width as f32) as i64);
        let y_range = (min_y.floor().max(0.0) as i64)..=(max_y.ceil().min(self.height as f32) as i64);
        for cy in y_range {
            for cx in x_range.clone() {
                let (px, py) = (cx as f32 + 0.5, cy as f32 + 0.5);
                if contains(points, px, py) {
                    self.plot(px, py, ch, color);
                }
            }
        }
    }

    fn stroke_polyline(&mut self, points: &[(f32, f32)], closed: bool, color: Color) {
        if points.len() == 1 {
            let (x, y) = points[0];
            self.plot(x, y, STROKE_CHAR, color);
            return;
        }
        for pair in points.windows(2) {
            self.stroke_segment(pair[0], pair[1], color);
        }
        if closed && points.len() > 2 {
            if let (Some(&last), Some(&first)) = (points.last(), points.first()) {
                self.stroke_segment(last, first, color);
            }
        }
    }

    fn stroke_segment(&mut self, (x0, y0): (f32, f32), (x1, y1): (f32, f32), color: Color) {
        let (dx, dy) = (x1 - x0, y1 - y0);
        let steps = dx.abs().max(dy.abs()).ceil().clamp(1.0, 4096.0) as usize;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.plot(x0 + dx * t, y0 + dy * t, STROKE_CHAR, color);
        }
    }

    /// Characters of one row, for text output and tests
    pub fn row_text(&self, y: u16) -> String {
        (0..self.width)
            .filter_map(|x| self.cell(x, y))
            .map(|cell| cell.ch)
            .collect()
    }

    /// The whole grid as plain text, trailing spaces trimmed
    pub fn to_text(&self) -> String {
        (0..self.height)
            .map(|y| self.row_text(y).trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn contains(points: &[(f32, f32)], px: f32, py: f32) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn term_color(color: Color) -> style::Color {
    style::Color::Rgb {
        r: color.r,
        g: color.g,
        b: color.b,
    }
}

/// Draws batches on the terminal's alternate screen
pub struct TerminalRasterizer {
    grid: CellGrid,
    out: Stdout,
    last_sequence: Option<u64>,
}

impl TerminalRasterizer {
    pub fn new(width: u16, height: u16) -> io::Result<Self> {
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        Ok(Self {
            grid: CellGrid::new(width, height),
            out,
            last_sequence: None,
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        for y in 0..self.grid.height() {
            queue!(self.out, MoveTo(0, y))?;
            let mut colors: Option<(Color, Color)> = None;
            let mut run = String::new();
            for x in 0..self.grid.width() {
                let Some(cell) = self.grid.cell(x, y) else {
                    continue;
                };
                if colors != Some((cell.fg, cell.bg)) {
                    if !run.is_empty() {
                        queue!(self.out, Print(std::mem::take(&mut run)))?;
                    }
                    queue!(
                        self.out,
                        SetForegroundColor(term_color(cell.fg)),
                        SetBackgroundColor(term_color(cell.bg))
                    )?;
                    colors = Some((cell.fg, cell.bg));
                }
                run.push(cell.ch);
            }
            if !run.is_empty() {
                queue!(self.out, Print(run))?;
            }
        }
        queue!(self.out, ResetColor)?;
        self.out.flush()
    }
}

impl Rasterizer for TerminalRasterizer {
    fn render(&mut self, batch: &DrawBatch, reused: bool) -> Result<(), Box<dyn std::error::Error>> {
        // The screen already shows this batch
        if reused && self.last_sequence == Some(batch.sequence) {
            return Ok(());
        }
        self.grid.draw(batch);
        self.flush()?;
        self.last_sequence = Some(batch.sequence);
        Ok(())
    }
}

impl Drop for TerminalRasterizer {
    fn drop(&mut self) {
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
    }
}

/// Grid shared between a [`HeadlessRasterizer`] and its creator
pub type SharedGrid = Arc<Mutex<CellGrid>>;

/// Rasterizes into a grid without touching the terminal
pub struct HeadlessRasterizer {
    grid: SharedGrid,
}

impl HeadlessRasterizer {
    pub fn new(width: u16, height: u16) -> (Self, SharedGrid) {
        let grid = Arc::new(Mutex::new(CellGrid::new(width, height)));
        (Self { grid: Arc::clone(&grid) }, grid)
    }
}

impl Rasterizer for HeadlessRasterizer {
    fn render(&mut self, batch: &DrawBatch, reused: bool) -> Result<(), Box<dyn std::error::Error>> {
        if !reused {
            self.grid
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .draw(batch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(width: u16, height: u16, commands: Vec<DrawCommand>) -> CellGrid {
        let mut grid = CellGrid::new(width, height);
        grid.draw(&DrawBatch::new(1, 1, commands));
        grid
    }

    #[test]
    fn test_fill_rect_covers_cells() {
        let grid = render(6, 4, vec![DrawCommand::FillRect { x: 1.0, y: 1.0, w: 3.0, h: 2.0 }]);
        assert_eq!(grid.row_text(0), "      ");
        assert_eq!(grid.row_text(1), " ███  ");
        assert_eq!(grid.row_text(2), " ███  ");
        assert_eq!(grid.row_text(3), "      ");
    }

    #[test]
    fn test_clear_sets_background() {
        let red = Color::rgb(255, 0, 0);
        let grid = render(3, 2, vec![DrawCommand::Clear { color: red }]);
        assert!(grid.cells.iter().all(|c| c.bg == red && c.ch == ' '));
    }

    #[test]
    fn test_translate_and_restore() {
        let grid = render(
            8,
            2,
            vec![
                DrawCommand::Save,
                DrawCommand::Translate { x: 4.0, y: 0.0 },
                DrawCommand::Text { x: 0.0, y: 0.0, text: "ab".into() },
                DrawCommand::Restore,
                DrawCommand::Text { x: 0.0, y: 1.0, text: "cd".into() },
            ],
        );
        assert_eq!(grid.row_text(0), "    ab  ");
        assert_eq!(grid.row_text(1), "cd      ");
    }

    #[test]
    fn test_scale_applies_to_shapes() {
        let grid = render(
            6,
            2,
            vec![
                DrawCommand::Scale { x: 2.0, y: 1.0 },
                DrawCommand::FillRect { x: 0.0, y: 0.0, w: 2.0, h: 1.0 },
            ],
        );
        assert_eq!(grid.row_text(0), "████  ");
    }

    #[test]
    fn test_line_is_stroked() {
        let grid = render(5, 1, vec![DrawCommand::Line { x1: 0.5, y1: 0.5, x2: 4.5, y2: 0.5 }]);
        assert_eq!(grid.row_text(0), "*****");
    }

    #[test]
    fn test_path_fill_and_colors() {
        let green = Color::rgb(0, 255, 0);
        let grid = render(
            4,
            4,
            vec![
                DrawCommand::SetFillColor { color: green },
                DrawCommand::BeginPath,
                DrawCommand::MoveTo { x: 0.0, y: 0.0 },
                DrawCommand::LineTo { x: 4.0, y: 0.0 },
                DrawCommand::LineTo { x: 4.0, y: 4.0 },
                DrawCommand::LineTo { x: 0.0, y: 4.0 },
                DrawCommand::ClosePath,
                DrawCommand::Fill,
            ],
        );
        assert_eq!(grid.to_text(), "████\n████\n████\n████");
        assert_eq!(grid.cell(2, 2).map(|c| c.fg), Some(green));
    }

    #[test]
    fn test_fill_circle_center() {
        let grid = render(9, 9, vec![DrawCommand::FillCircle { x: 4.5, y: 4.5, radius: 3.0 }]);
        assert_eq!(grid.cell(4, 4).map(|c| c.ch), Some(FILL_CHAR));
        assert_eq!(grid.cell(0, 0).map(|c| c.ch), Some(' '));
    }

    #[test]
    fn test_offscreen_drawing_is_clipped() {
        let grid = render(
            3,
            1,
            vec![
                DrawCommand::FillRect { x: -10.0, y: -10.0, w: 100.0, h: 100.0 },
                DrawCommand::Text { x: 2.0, y: 0.0, text: "long".into() },
            ],
        );
        assert_eq!(grid.row_text(0), "██l");
    }

    #[test]
    fn test_headless_skips_reused_frames() {
        let (mut raster, grid) = HeadlessRasterizer::new(4, 1);
        raster
            .render(&DrawBatch::new(1, 1, vec![DrawCommand::Text { x: 0.0, y: 0.0, text: "hi".into() }]), false)
            .unwrap();
        raster.render(&DrawBatch::new(1, 1, vec![]), true).unwrap();
        assert_eq!(grid.lock().unwrap().to_text(), "hi");
    }
}
