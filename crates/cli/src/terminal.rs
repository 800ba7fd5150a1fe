//! Terminal host
//!
//! The production collaborator bundle: text goes to the terminal through
//! crossterm (colors, cursor addressing, raw-mode key polling); pixel
//! statements land in an in-memory 320×200 framebuffer so `POINT`, sprite
//! `GET`/`PUT`, and collision probes behave, even though nothing rasterizes
//! to the screen. BEEP rings the terminal bell; SOUND/PLAY are logged.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Color;
use crossterm::{cursor, execute, style, terminal};
use qb_lang::stmt::LineStyle;
use qb_runtime::files::DiskFs;
use qb_runtime::{Audio, Clock, FileSys, Host, Input, PutMode, Sprite, Surface};
use tracing::debug;

use crate::config::TerminalConfig;

const PIX_W: i32 = 320;
const PIX_H: i32 = 200;

/// Classic 16-color text palette → terminal colors.
fn qb_color(n: i32) -> Color {
    match n & 0x0F {
        0 => Color::Black,
        1 => Color::DarkBlue,
        2 => Color::DarkGreen,
        3 => Color::DarkCyan,
        4 => Color::DarkRed,
        5 => Color::DarkMagenta,
        6 => Color::DarkYellow,
        7 => Color::Grey,
        8 => Color::DarkGrey,
        9 => Color::Blue,
        10 => Color::Green,
        11 => Color::Cyan,
        12 => Color::Red,
        13 => Color::Magenta,
        14 => Color::Yellow,
        _ => Color::White,
    }
}

pub struct TermSurface {
    colors: bool,
    row: u16,
    col: u16,
    cols: u16,
    framebuffer: Vec<u8>,
    fg: i32,
    last_xy: (i32, i32),
    palette_version: u32,
}

impl TermSurface {
    fn new(config: &TerminalConfig) -> TermSurface {
        TermSurface {
            colors: config.colors,
            row: 1,
            col: 1,
            cols: 80,
            framebuffer: vec![0; (PIX_W * PIX_H) as usize],
            fg: 15,
            last_xy: (0, 0),
            palette_version: 1,
        }
    }

    fn plot(&mut self, x: i32, y: i32, color: i32) {
        if (0..PIX_W).contains(&x) && (0..PIX_H).contains(&y) {
            self.framebuffer[(y * PIX_W + x) as usize] = color as u8;
        }
        self.last_xy = (x, y);
    }

    fn pixel(&self, x: i32, y: i32) -> i32 {
        if (0..PIX_W).contains(&x) && (0..PIX_H).contains(&y) {
            self.framebuffer[(y * PIX_W + x) as usize] as i32
        } else {
            -1
        }
    }
}

impl Surface for TermSurface {
    fn mode_set(&mut self, mode: i32) -> qb_lang::Result<()> {
        if !matches!(mode, 0..=2 | 7..=13) {
            return Err(qb_lang::RuntimeError::illegal_call(format!("SCREEN {mode}")));
        }
        debug!(mode, "screen mode set");
        Ok(())
    }

    fn cls(&mut self, _arg: Option<i32>) {
        self.framebuffer.fill(0);
        let _ = execute!(
            io::stdout(),
            terminal::Clear(terminal::ClearType::All),
            cursor::MoveTo(0, 0)
        );
        self.row = 1;
        self.col = 1;
    }

    fn color(&mut self, fg: Option<i32>, bg: Option<i32>) {
        if let Some(fg) = fg {
            self.fg = fg;
            if self.colors {
                let _ = execute!(io::stdout(), style::SetForegroundColor(qb_color(fg)));
            }
        }
        if let Some(bg) = bg
            && self.colors
        {
            let _ = execute!(io::stdout(), style::SetBackgroundColor(qb_color(bg)));
        }
    }

    fn locate(&mut self, row: Option<i32>, col: Option<i32>, _cursor: Option<bool>) {
        if let Some(r) = row {
            self.row = r.max(1) as u16;
        }
        if let Some(c) = col {
            self.col = c.max(1) as u16;
        }
        let _ = execute!(io::stdout(), cursor::MoveTo(self.col - 1, self.row - 1));
    }

    fn print(&mut self, text: &str) {
        let mut out = io::stdout();
        // Terminal newline discipline needs \r in raw mode
        let _ = out.write_all(text.replace('\n', "\r\n").as_bytes());
        let _ = out.flush();
        for c in text.chars() {
            if c == '\n' {
                self.row += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn cursor(&self) -> (u16, u16) {
        (self.row, self.col)
    }

    fn text_width(&self) -> u16 {
        self.cols
    }

    fn set_text_width(&mut self, cols: i32) {
        self.cols = cols.max(1) as u16;
    }

    fn pset(&mut self, x: i32, y: i32, color: Option<i32>) {
        self.plot(x, y, color.unwrap_or(self.fg));
    }

    fn preset(&mut self, x: i32, y: i32, color: Option<i32>) {
        self.plot(x, y, color.unwrap_or(0));
    }

    fn line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Option<i32>, style: LineStyle) {
        let c = color.unwrap_or(self.fg);
        match style {
            LineStyle::Plain => self.draw_line(x1, y1, x2, y2, c),
            LineStyle::Box => {
                self.draw_line(x1, y1, x2, y1, c);
                self.draw_line(x1, y2, x2, y2, c);
                self.draw_line(x1, y1, x1, y2, c);
                self.draw_line(x2, y1, x2, y2, c);
            }
            LineStyle::FilledBox => {
                let (ya, yb) = (y1.min(y2), y1.max(y2));
                for y in ya..=yb {
                    self.draw_line(x1, y, x2, y, c);
                }
            }
        }
        self.last_xy = (x2, y2);
    }

    fn circle(
        &mut self,
        cx: i32,
        cy: i32,
        r: i32,
        color: Option<i32>,
        _start: Option<f64>,
        _end: Option<f64>,
        aspect: Option<f64>,
    ) {
        // Midpoint circle; arcs degrade to the full circle
        let c = color.unwrap_or(self.fg);
        let aspect = aspect.unwrap_or(0.8);
        let mut x = r;
        let mut y = 0;
        let mut err = 1 - r;
        while x >= y {
            for (dx, dy) in [
                (x, y),
                (y, x),
                (-y, x),
                (-x, y),
                (-x, -y),
                (-y, -x),
                (y, -x),
                (x, -y),
            ] {
                let py = cy + (dy as f64 * aspect).round() as i32;
                self.plot(cx + dx, py, c);
            }
            y += 1;
            if err < 0 {
                err += 2 * y + 1;
            } else {
                x -= 1;
                err += 2 * (y - x) + 1;
            }
        }
        self.last_xy = (cx, cy);
    }

    fn paint(&mut self, x: i32, y: i32, fill: Option<i32>, border: Option<i32>) {
        // Flood fill bounded by the border color (or by differing pixels)
        let fill = fill.unwrap_or(self.fg);
        let start = self.pixel(x, y);
        if start < 0 || start == fill {
            return;
        }
        let stop_at = border.unwrap_or(fill);
        let mut stack = vec![(x, y)];
        while let Some((px, py)) = stack.pop() {
            let p = self.pixel(px, py);
            if p < 0 || p == fill || p == stop_at {
                continue;
            }
            self.plot(px, py, fill);
            stack.push((px + 1, py));
            stack.push((px - 1, py));
            stack.push((px, py + 1));
            stack.push((px, py - 1));
        }
    }

    fn point(&self, x: i32, y: i32) -> i32 {
        self.pixel(x, y)
    }

    fn last_point(&self) -> (i32, i32) {
        self.last_xy
    }

    fn get(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> qb_lang::Result<Sprite> {
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));
        let width = (x2 - x1 + 1).max(0) as u16;
        let height = (y2 - y1 + 1).max(0) as u16;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in y1..=y2 {
            for x in x1..=x2 {
                pixels.push(self.pixel(x, y).max(0) as u8);
            }
        }
        Ok(Sprite {
            width,
            height,
            pixels: std::rc::Rc::new(pixels),
            palette_version: self.palette_version,
        })
    }

    fn put(&mut self, x: i32, y: i32, sprite: &Sprite, mode: PutMode) -> qb_lang::Result<()> {
        for dy in 0..sprite.height as i32 {
            for dx in 0..sprite.width as i32 {
                let src = sprite.pixels[(dy * sprite.width as i32 + dx) as usize] as i32;
                let (px, py) = (x + dx, y + dy);
                let dst = self.pixel(px, py).max(0);
                let out = match mode {
                    PutMode::Pset => src,
                    PutMode::Preset => !src & 0xFF,
                    PutMode::And => dst & src,
                    PutMode::Or => dst | src,
                    PutMode::Xor => dst ^ src,
                };
                self.plot(px, py, out);
            }
        }
        Ok(())
    }

    fn palette_set(&mut self, index: i32, rgb: i32) {
        self.palette_version += 1;
        debug!(index, rgb, "palette change");
    }

    fn palette_version(&self) -> u32 {
        self.palette_version
    }

    fn view(&mut self, coords: Option<(i32, i32, i32, i32)>, screen: bool) {
        debug!(?coords, screen, "viewport set");
    }

    fn window(&mut self, coords: Option<(f64, f64, f64, f64)>, screen: bool) {
        debug!(?coords, screen, "window transform set");
    }

    fn pcopy(&mut self, src: i32, dst: i32) {
        debug!(src, dst, "pcopy");
    }
}

impl TermSurface {
    fn draw_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: i32) {
        let dx = (x2 - x1).abs();
        let dy = -(y2 - y1).abs();
        let sx = if x1 < x2 { 1 } else { -1 };
        let sy = if y1 < y2 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x1, y1);
        loop {
            self.plot(x, y, color);
            if x == x2 && y == y2 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// Audio: the terminal bell is the beeper.
#[derive(Default)]
pub struct TermAudio;

impl Audio for TermAudio {
    fn beep(&mut self) {
        let mut out = io::stdout();
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }

    fn tone(&mut self, freq_hz: f64, ticks: f64) {
        debug!(freq_hz, ticks, "SOUND (no audio device)");
    }

    fn play_mml(&mut self, mml: &str) {
        debug!(mml, "PLAY (no audio device)");
    }

    fn queue_len(&self) -> usize {
        0
    }
}

/// Keyboard input over crossterm's event queue.
pub struct TermInput {
    pending: VecDeque<String>,
    trap_keys: VecDeque<u8>,
    held: HashSet<i32>,
    cancelled: std::rc::Rc<std::cell::Cell<bool>>,
}

impl TermInput {
    fn new(cancelled: std::rc::Rc<std::cell::Cell<bool>>) -> TermInput {
        TermInput {
            pending: VecDeque::new(),
            trap_keys: VecDeque::new(),
            held: HashSet::new(),
            cancelled,
        }
    }

    /// Drain pending terminal events into the key queues.
    fn pump(&mut self) {
        while event::poll(Duration::ZERO).unwrap_or(false) {
            match event::read() {
                Ok(Event::Key(key)) => self.take_key(key),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    fn take_key(&mut self, key: KeyEvent) {
        match key.kind {
            KeyEventKind::Press | KeyEventKind::Repeat => {}
            KeyEventKind::Release => {
                if let Some(code) = scancode_of(&key.code) {
                    self.held.remove(&code);
                }
                return;
            }
        }
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
        {
            self.cancelled.set(true);
            return;
        }
        if let Some(code) = scancode_of(&key.code) {
            self.held.insert(code);
        }
        if let Some(slot) = trap_slot_of(&key.code) {
            self.trap_keys.push_back(slot);
        }
        if let Some(text) = inkey_text(&key) {
            self.pending.push_back(text);
        }
    }
}

/// INKEY$ encoding: plain chars as themselves, extended keys as NUL + code.
fn inkey_text(key: &KeyEvent) -> Option<String> {
    Some(match key.code {
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Backspace => "\x08".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::Up => "\0H".to_string(),
        KeyCode::Down => "\0P".to_string(),
        KeyCode::Left => "\0K".to_string(),
        KeyCode::Right => "\0M".to_string(),
        KeyCode::Home => "\0G".to_string(),
        KeyCode::End => "\0O".to_string(),
        KeyCode::PageUp => "\0I".to_string(),
        KeyCode::PageDown => "\0Q".to_string(),
        KeyCode::Insert => "\0R".to_string(),
        KeyCode::Delete => "\0S".to_string(),
        KeyCode::F(n) => {
            let code = (58 + n) as u8 as char;
            format!("\0{code}")
        }
        _ => return None,
    })
}

/// PC scan codes for KEYDOWN-style probing.
fn scancode_of(code: &KeyCode) -> Option<i32> {
    Some(match code {
        KeyCode::Esc => 1,
        KeyCode::Enter => 28,
        KeyCode::Char(' ') => 57,
        KeyCode::Up => 72,
        KeyCode::Left => 75,
        KeyCode::Right => 77,
        KeyCode::Down => 80,
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'a' => 30,
            's' => 31,
            'd' => 32,
            'w' => 17,
            'z' => 44,
            'x' => 45,
            _ => return None,
        },
        KeyCode::F(n) if *n >= 1 && *n <= 10 => 58 + *n as i32,
        _ => return None,
    })
}

/// KEY(n) trap slots: F1..F10 → 1..10, arrows → 11..14.
fn trap_slot_of(code: &KeyCode) -> Option<u8> {
    Some(match code {
        KeyCode::F(n) if *n >= 1 && *n <= 10 => *n as u8,
        KeyCode::Up => 11,
        KeyCode::Left => 12,
        KeyCode::Right => 13,
        KeyCode::Down => 14,
        _ => return None,
    })
}

impl Input for TermInput {
    fn inkey(&mut self) -> Option<String> {
        self.pump();
        self.pending.pop_front()
    }

    fn keydown(&self, scancode: i32) -> bool {
        self.held.contains(&scancode)
    }

    fn read_line(&mut self) -> Option<String> {
        // Cooked-mode read so the user gets echo and editing
        let was_raw = terminal::is_raw_mode_enabled().unwrap_or(false);
        if was_raw {
            let _ = terminal::disable_raw_mode();
        }
        let mut line = String::new();
        let result = io::stdin().read_line(&mut line);
        if was_raw {
            let _ = terminal::enable_raw_mode();
        }
        match result {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn mouse(&self) -> (i32, i32, i32) {
        (0, 0, 0)
    }

    fn stick(&self, _n: i32) -> i32 {
        0
    }

    fn strig(&mut self, _n: i32) -> bool {
        false
    }

    fn poll_trap_key(&mut self) -> Option<u8> {
        self.pump();
        self.trap_keys.pop_front()
    }
}

/// Wall clock; TIMER is seconds since midnight UTC.
#[derive(Default)]
pub struct TermClock;

fn epoch_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Civil date from the Unix epoch (days), for DATE$ without a date crate.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

impl Clock for TermClock {
    fn timer(&self) -> f64 {
        let now = epoch_now();
        (now.as_secs_f64()) % 86_400.0
    }

    fn sleep(&mut self, seconds: f64) {
        // Pump terminal events while waiting so the window stays live
        let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
        while Instant::now() < deadline {
            let remaining = deadline - Instant::now();
            let _ = event::poll(remaining.min(Duration::from_millis(20)));
        }
    }

    fn date(&self) -> String {
        let days = (epoch_now().as_secs() / 86_400) as i64;
        let (y, m, d) = civil_from_days(days);
        format!("{m:02}-{d:02}-{y:04}")
    }

    fn time(&self) -> String {
        let secs = epoch_now().as_secs() % 86_400;
        format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )
    }
}

/// The collaborator bundle handed to the interpreter.
pub struct TerminalHost {
    surface: TermSurface,
    audio: TermAudio,
    input: TermInput,
    files: DiskFs,
    clock: TermClock,
    cancelled: std::rc::Rc<std::cell::Cell<bool>>,
    raw_mode: bool,
}

impl TerminalHost {
    pub fn new(config: &TerminalConfig) -> TerminalHost {
        let cancelled = std::rc::Rc::new(std::cell::Cell::new(false));
        let raw_mode = terminal::enable_raw_mode().is_ok();
        TerminalHost {
            surface: TermSurface::new(config),
            audio: TermAudio,
            input: TermInput::new(cancelled.clone()),
            files: DiskFs::default(),
            clock: TermClock,
            cancelled,
            raw_mode,
        }
    }
}

impl Drop for TerminalHost {
    fn drop(&mut self) {
        if self.raw_mode {
            let _ = terminal::disable_raw_mode();
        }
        let _ = execute!(io::stdout(), style::ResetColor, cursor::Show);
    }
}

impl Host for TerminalHost {
    fn surface(&mut self) -> &mut dyn Surface {
        &mut self.surface
    }

    fn audio(&mut self) -> &mut dyn Audio {
        &mut self.audio
    }

    fn input(&mut self) -> &mut dyn Input {
        &mut self.input
    }

    fn files(&mut self) -> &mut dyn FileSys {
        &mut self.files
    }

    fn clock(&mut self) -> &mut dyn Clock {
        &mut self.clock
    }

    fn cancelled(&self) -> bool {
        self.cancelled.get()
    }

    fn yield_frame(&mut self) {
        self.input.pump();
    }
}
