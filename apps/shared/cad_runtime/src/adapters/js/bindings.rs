//! Native objects backing the `draw`, `input` and `time` globals
//!
//! Every binding shares one [`FrameState`] with the engine. The engine fills
//! in the input snapshot before calling `onFrame` and collects the recorded
//! commands afterwards.

use std::sync::{Arc, Mutex};

use cad_protocol::{Color, DrawCommand, InputState, MouseButton};
use rquickjs::{Ctx, Function, Object};
use tracing::{debug, error, info, warn};

use crate::channel::lock;

/// Data shared between the engine and its native functions
#[derive(Debug, Default)]
pub struct FrameState {
    pub input: InputState,
    pub commands: Vec<DrawCommand>,
}

pub type SharedFrameState = Arc<Mutex<FrameState>>;

/// Throw a JavaScript `Error` so scripts get a proper stack trace
pub(crate) fn throw_error(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    let escaped = message.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
    match ctx.eval::<rquickjs::Value, _>(format!("new Error(\"{}\")", escaped)) {
        Ok(error) => ctx.throw(error),
        Err(e) => e,
    }
}

fn parse_color(ctx: &Ctx<'_>, value: &str) -> rquickjs::Result<Color> {
    Color::parse(value).map_err(|e| throw_error(ctx, &e.to_string()))
}

fn button(index: u32) -> Option<MouseButton> {
    MouseButton::from_u32(index)
}

/// Register a draw function that records one command
macro_rules! draw_fn {
    ($ctx:expr, $obj:expr, $state:expr, $name:literal, |$($arg:ident : $ty:ty),*| $command:expr) => {{
        let state = Arc::clone(&$state);
        $obj.set(
            $name,
            Function::new($ctx.clone(), move |$($arg: $ty),*| {
                lock(&state).commands.push($command);
            })?,
        )?;
    }};
}

/// Register a draw function that takes a CSS-style color string
macro_rules! color_fn {
    ($ctx:expr, $obj:expr, $state:expr, $name:literal, $variant:ident) => {{
        let state = Arc::clone(&$state);
        $obj.set(
            $name,
            Function::new($ctx.clone(), move |ctx: Ctx<'_>, color: String| -> rquickjs::Result<()> {
                let color = parse_color(&ctx, &color)?;
                lock(&state).commands.push(DrawCommand::$variant { color });
                Ok(())
            })?,
        )?;
    }};
}

fn setup_draw_api<'js>(ctx: &Ctx<'js>, state: &SharedFrameState) -> rquickjs::Result<Object<'js>> {
    let draw = Object::new(ctx.clone())?;

    color_fn!(ctx, draw, state, "clear", Clear);
    color_fn!(ctx, draw, state, "setFillColor", SetFillColor);
    color_fn!(ctx, draw, state, "setStrokeColor", SetStrokeColor);

    draw_fn!(ctx, draw, state, "rect", |x: f64, y: f64, w: f64, h: f64| DrawCommand::Rect {
        x: x as f32,
        y: y as f32,
        w: w as f32,
        h: h as f32,
    });
    draw_fn!(ctx, draw, state, "fillRect", |x: f64, y: f64, w: f64, h: f64| DrawCommand::FillRect {
        x: x as f32,
        y: y as f32,
        w: w as f32,
        h: h as f32,
    });
    draw_fn!(ctx, draw, state, "circle", |x: f64, y: f64, r: f64| DrawCommand::Circle {
        x: x as f32,
        y: y as f32,
        radius: r as f32,
    });
    draw_fn!(ctx, draw, state, "fillCircle", |x: f64, y: f64, r: f64| DrawCommand::FillCircle {
        x: x as f32,
        y: y as f32,
        radius: r as f32,
    });
    draw_fn!(ctx, draw, state, "line", |x1: f64, y1: f64, x2: f64, y2: f64| DrawCommand::Line {
        x1: x1 as f32,
        y1: y1 as f32,
        x2: x2 as f32,
        y2: y2 as f32,
    });
    draw_fn!(ctx, draw, state, "text", |x: f64, y: f64, text: String| DrawCommand::Text {
        x: x as f32,
        y: y as f32,
        text,
    });
    draw_fn!(ctx, draw, state, "image", |id: String, x: f64, y: f64, w: f64, h: f64| DrawCommand::Image {
        image_id: id,
        x: x as f32,
        y: y as f32,
        w: w as f32,
        h: h as f32,
    });
    draw_fn!(ctx, draw, state, "beginPath", | | DrawCommand::BeginPath);
    draw_fn!(ctx, draw, state, "moveTo", |x: f64, y: f64| DrawCommand::MoveTo {
        x: x as f32,
        y: y as f32,
    });
    draw_fn!(ctx, draw, state, "lineTo", |x: f64, y: f64| DrawCommand::LineTo {
        x: x as f32,
        y: y as f32,
    });
    draw_fn!(ctx, draw, state, "arc", |x: f64, y: f64, r: f64, start: f64, end: f64| DrawCommand::Arc {
        x: x as f32,
        y: y as f32,
        radius: r as f32,
        start_angle: start as f32,
        end_angle: end as f32,
    });
    draw_fn!(ctx, draw, state, "closePath", | | DrawCommand::ClosePath);
    draw_fn!(ctx, draw, state, "fill", | | DrawCommand::Fill);
    draw_fn!(ctx, draw, state, "stroke", | | DrawCommand::Stroke);
    draw_fn!(ctx, draw, state, "setLineWidth", |width: f64| DrawCommand::SetLineWidth {
        width: width as f32,
    });
    draw_fn!(ctx, draw, state, "setFont", |size: f64, family: String| DrawCommand::SetFont {
        size: size as f32,
        family,
    });
    draw_fn!(ctx, draw, state, "save", | | DrawCommand::Save);
    draw_fn!(ctx, draw, state, "restore", | | DrawCommand::Restore);
    draw_fn!(ctx, draw, state, "translate", |x: f64, y: f64| DrawCommand::Translate {
        x: x as f32,
        y: y as f32,
    });
    draw_fn!(ctx, draw, state, "rotate", |radians: f64| DrawCommand::Rotate {
        radians: radians as f32,
    });
    draw_fn!(ctx, draw, state, "scale", |x: f64, y: f64| DrawCommand::Scale {
        x: x as f32,
        y: y as f32,
    });
    draw_fn!(ctx, draw, state, "setTransform", |a: f64, b: f64, c: f64, d: f64, e: f64, f: f64| {
        DrawCommand::SetTransform {
            a: a as f32,
            b: b as f32,
            c: c as f32,
            d: d as f32,
            e: e as f32,
            f: f as f32,
        }
    });

    Ok(draw)
}

fn setup_input_api<'js>(ctx: &Ctx<'js>, state: &SharedFrameState) -> rquickjs::Result<Object<'js>> {
    let input = Object::new(ctx.clone())?;

    let s = Arc::clone(state);
    input.set(
        "isKeyDown",
        Function::new(ctx.clone(), move |key: String| lock(&s).input.is_key_down(&key))?,
    )?;
    let s = Arc::clone(state);
    input.set(
        "isKeyPressed",
        Function::new(ctx.clone(), move |key: String| lock(&s).input.is_key_pressed(&key))?,
    )?;
    let s = Arc::clone(state);
    input.set(
        "keysDown",
        Function::new(ctx.clone(), move || lock(&s).input.keys_down.iter().cloned().collect::<Vec<_>>())?,
    )?;
    let s = Arc::clone(state);
    input.set(
        "keysPressed",
        Function::new(ctx.clone(), move || lock(&s).input.keys_pressed.iter().cloned().collect::<Vec<_>>())?,
    )?;
    let s = Arc::clone(state);
    input.set("mouseX", Function::new(ctx.clone(), move || lock(&s).input.mouse_x as f64)?)?;
    let s = Arc::clone(state);
    input.set("mouseY", Function::new(ctx.clone(), move || lock(&s).input.mouse_y as f64)?)?;
    let s = Arc::clone(state);
    input.set(
        "isMouseDown",
        Function::new(ctx.clone(), move |index: u32| {
            button(index).is_some_and(|b| lock(&s).input.is_mouse_down(b))
        })?,
    )?;
    let s = Arc::clone(state);
    input.set(
        "isMousePressed",
        Function::new(ctx.clone(), move |index: u32| {
            button(index).is_some_and(|b| lock(&s).input.is_mouse_pressed(b))
        })?,
    )?;

    Ok(input)
}

fn setup_time_api<'js>(ctx: &Ctx<'js>, state: &SharedFrameState) -> rquickjs::Result<Object<'js>> {
    let time = Object::new(ctx.clone())?;

    let s = Arc::clone(state);
    time.set("delta", Function::new(ctx.clone(), move || lock(&s).input.timing.delta)?)?;
    let s = Arc::clone(state);
    time.set("elapsed", Function::new(ctx.clone(), move || lock(&s).input.timing.elapsed)?)?;
    let s = Arc::clone(state);
    time.set("frame", Function::new(ctx.clone(), move || lock(&s).input.frame_number as f64)?)?;

    Ok(time)
}

/// Build the native object consumed by the prelude
pub fn setup_native_api(ctx: &Ctx<'_>, state: &SharedFrameState, script: &str) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;
    native.set("draw", setup_draw_api(ctx, state)?)?;
    native.set("input", setup_input_api(ctx, state)?)?;
    native.set("time", setup_time_api(ctx, state)?)?;

    let script = script.to_string();
    native.set(
        "log",
        Function::new(ctx.clone(), move |level: String, message: String| match level.as_str() {
            "error" => error!(target: "script", engine = "js", script = script.as_str(), "{}", message),
            "warn" => warn!(target: "script", engine = "js", script = script.as_str(), "{}", message),
            "debug" => debug!(target: "script", engine = "js", script = script.as_str(), "{}", message),
            _ => info!(target: "script", engine = "js", script = script.as_str(), "{}", message),
        })?,
    )?;

    ctx.globals().set("__cad_native", native)?;
    Ok(())
}
