//! Host collaborator interfaces
//!
//! The language core drives graphics, audio, files, input, and time through
//! these narrow traits and never reaches around them. Production hosts live
//! with the CLI; [`HeadlessHost`] is the scriptable double the test suites
//! drive: keys and input lines are queued up front, output and collaborator
//! calls are captured for assertions.

use std::collections::VecDeque;
use std::rc::Rc;

use qb_lang::error::{Result, RuntimeError};
use qb_lang::stmt::LineStyle;

/// A captured screen rectangle. Pixels are palette indices; the palette
/// version taken at capture lets a renderer notice stale pre-renders.
#[derive(Debug, Clone, PartialEq)]
pub struct Sprite {
    pub width: u16,
    pub height: u16,
    pub pixels: Rc<Vec<u8>>,
    pub palette_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    Pset,
    Preset,
    And,
    Or,
    Xor,
}

impl PutMode {
    pub fn from_word(word: &str) -> Option<PutMode> {
        match word.to_ascii_uppercase().as_str() {
            "PSET" => Some(PutMode::Pset),
            "PRESET" => Some(PutMode::Preset),
            "AND" => Some(PutMode::And),
            "OR" => Some(PutMode::Or),
            "XOR" => Some(PutMode::Xor),
            _ => None,
        }
    }
}

/// The pixel/text surface (§6). Pixel coordinates are already
/// view/window-resolved by the implementation.
pub trait Surface {
    fn mode_set(&mut self, mode: i32) -> Result<()>;
    fn cls(&mut self, arg: Option<i32>);
    fn color(&mut self, fg: Option<i32>, bg: Option<i32>);
    fn locate(&mut self, row: Option<i32>, col: Option<i32>, cursor_visible: Option<bool>);
    fn print(&mut self, text: &str);
    /// 1-based (row, column) of the text cursor (CSRLIN / POS).
    fn cursor(&self) -> (u16, u16);
    fn text_width(&self) -> u16;
    fn set_text_width(&mut self, cols: i32);

    fn pset(&mut self, x: i32, y: i32, color: Option<i32>);
    fn preset(&mut self, x: i32, y: i32, color: Option<i32>);
    fn line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Option<i32>, style: LineStyle);
    #[allow(clippy::too_many_arguments)]
    fn circle(
        &mut self,
        x: i32,
        y: i32,
        r: i32,
        color: Option<i32>,
        start: Option<f64>,
        end: Option<f64>,
        aspect: Option<f64>,
    );
    fn paint(&mut self, x: i32, y: i32, fill: Option<i32>, border: Option<i32>);
    fn point(&self, x: i32, y: i32) -> i32;
    /// Last pen position, for `STEP` coordinates.
    fn last_point(&self) -> (i32, i32);

    fn get(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Sprite>;
    fn put(&mut self, x: i32, y: i32, sprite: &Sprite, mode: PutMode) -> Result<()>;

    fn palette_set(&mut self, index: i32, rgb: i32);
    fn palette_version(&self) -> u32;

    fn view(&mut self, coords: Option<(i32, i32, i32, i32)>, screen: bool);
    fn window(&mut self, coords: Option<(f64, f64, f64, f64)>, screen: bool);
    fn pcopy(&mut self, src: i32, dst: i32);
}

/// Beeper-style audio (§6). `tick` is 1/18.2 seconds.
pub trait Audio {
    fn beep(&mut self);
    fn tone(&mut self, freq_hz: f64, ticks: f64);
    fn play_mml(&mut self, mml: &str);
    /// Notes still queued, for the PLAY(n) trap.
    fn queue_len(&self) -> usize;
}

/// Keyboard, mouse and joystick (§6).
pub trait Input {
    /// Non-blocking: next typed key, `"\0"+code` for extended keys.
    fn inkey(&mut self) -> Option<String>;
    /// Level probe for simultaneous-key detection; independent of the trap
    /// layer, consumes nothing.
    fn keydown(&self, scancode: i32) -> bool;
    /// Blocking line read for INPUT; pumps host events while waiting.
    /// `None` means the host cancelled.
    fn read_line(&mut self) -> Option<String>;
    fn mouse(&self) -> (i32, i32, i32);
    fn stick(&self, n: i32) -> i32;
    fn strig(&mut self, n: i32) -> bool;
    /// Edge-triggered trap-key queue: KEY(n) slot numbers pressed since the
    /// last poll. Separate from `inkey` so traps and reads do not fight.
    fn poll_trap_key(&mut self) -> Option<u8>;
}

/// The file collaborator (§6). Handles are program-visible numbers 1..=255.
pub trait FileSys {
    fn open(&mut self, path: &str, mode: FileOpenMode, handle: u16) -> Result<()>;
    fn close(&mut self, handle: u16) -> Result<()>;
    fn close_all(&mut self);
    fn is_open(&self, handle: u16) -> bool;
    fn eof(&mut self, handle: u16) -> Result<bool>;
    fn lof(&mut self, handle: u16) -> Result<i64>;
    fn loc(&mut self, handle: u16) -> Result<i64>;
    fn seek(&mut self, handle: u16, pos: i64) -> Result<()>;
    fn freefile(&self) -> u16;
    /// One comma/newline-delimited INPUT# field.
    fn read_token(&mut self, handle: u16) -> Result<String>;
    fn read_line(&mut self, handle: u16) -> Result<String>;
    fn read_chars(&mut self, handle: u16, n: usize) -> Result<String>;
    fn write_text(&mut self, handle: u16, text: &str) -> Result<()>;
    fn get_bytes(&mut self, handle: u16, pos: Option<i64>, len: usize) -> Result<Vec<u8>>;
    fn put_bytes(&mut self, handle: u16, pos: Option<i64>, bytes: &[u8]) -> Result<()>;
    fn record_len(&self, handle: u16) -> Result<Option<u32>>;
    fn kill(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn chdir(&mut self, path: &str) -> Result<()>;
    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;
    fn list(&mut self, pattern: &str) -> Result<Vec<String>>;
    /// BLOAD payload (header already stripped).
    fn bload(&mut self, path: &str) -> Result<Vec<u8>>;
    /// BSAVE with the 7-byte `0xFD` header.
    fn bsave(&mut self, path: &str, offset: u16, payload: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpenMode {
    Input,
    Output,
    Append,
    Binary,
    Random(u32),
}

/// Wall clock and scheduling.
pub trait Clock {
    /// Seconds since midnight, fractional (TIMER).
    fn timer(&self) -> f64;
    /// `SLEEP n`; must keep pumping host events.
    fn sleep(&mut self, seconds: f64);
    fn date(&self) -> String;
    fn time(&self) -> String;
}

/// The bundle the executor holds.
pub trait Host {
    fn surface(&mut self) -> &mut dyn Surface;
    fn audio(&mut self) -> &mut dyn Audio;
    fn input(&mut self) -> &mut dyn Input;
    fn files(&mut self) -> &mut dyn FileSys;
    fn clock(&mut self) -> &mut dyn Clock;
    /// Host asked the program to stop (window close, Ctrl-Break).
    fn cancelled(&self) -> bool {
        false
    }
    /// Called once per drained statement budget so the host can repaint.
    fn yield_frame(&mut self) {}
}

// ---------------------------------------------------------------------------
// Headless host for tests
// ---------------------------------------------------------------------------

const HEADLESS_W: usize = 320;
const HEADLESS_H: usize = 200;

/// Surface double: text accumulates into a transcript, pixels go to an
/// in-memory framebuffer, everything else is logged.
#[derive(Debug)]
pub struct HeadlessSurface {
    pub transcript: String,
    pub calls: Vec<String>,
    framebuffer: Vec<u8>,
    row: u16,
    col: u16,
    cols: u16,
    fg: i32,
    last_xy: (i32, i32),
    palette_version: u32,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        HeadlessSurface {
            transcript: String::new(),
            calls: Vec::new(),
            framebuffer: vec![0; HEADLESS_W * HEADLESS_H],
            row: 1,
            col: 1,
            cols: 80,
            fg: 15,
            last_xy: (0, 0),
            palette_version: 1,
        }
    }
}

impl HeadlessSurface {
    fn plot(&mut self, x: i32, y: i32, color: i32) {
        if (0..HEADLESS_W as i32).contains(&x) && (0..HEADLESS_H as i32).contains(&y) {
            self.framebuffer[y as usize * HEADLESS_W + x as usize] = color as u8;
        }
        self.last_xy = (x, y);
    }
}

impl Surface for HeadlessSurface {
    fn mode_set(&mut self, mode: i32) -> Result<()> {
        if !matches!(mode, 0..=2 | 7..=13) {
            return Err(RuntimeError::illegal_call(format!("SCREEN {mode}")));
        }
        self.calls.push(format!("screen {mode}"));
        Ok(())
    }

    fn cls(&mut self, _arg: Option<i32>) {
        self.framebuffer.fill(0);
        self.row = 1;
        self.col = 1;
        self.calls.push("cls".into());
    }

    fn color(&mut self, fg: Option<i32>, _bg: Option<i32>) {
        if let Some(fg) = fg {
            self.fg = fg;
        }
    }

    fn locate(&mut self, row: Option<i32>, col: Option<i32>, _cursor: Option<bool>) {
        if let Some(r) = row {
            self.row = r.max(1) as u16;
        }
        if let Some(c) = col {
            self.col = c.max(1) as u16;
        }
    }

    fn print(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.row += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.transcript.push_str(text);
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
        self.calls
            .push(format!("line {x1},{y1}-{x2},{y2} {color:?} {style:?}"));
        self.last_xy = (x2, y2);
    }

    fn circle(
        &mut self,
        x: i32,
        y: i32,
        r: i32,
        color: Option<i32>,
        _start: Option<f64>,
        _end: Option<f64>,
        _aspect: Option<f64>,
    ) {
        self.calls.push(format!("circle {x},{y} r{r} {color:?}"));
        self.last_xy = (x, y);
    }

    fn paint(&mut self, x: i32, y: i32, fill: Option<i32>, border: Option<i32>) {
        self.calls
            .push(format!("paint {x},{y} {fill:?} {border:?}"));
    }

    fn point(&self, x: i32, y: i32) -> i32 {
        if (0..HEADLESS_W as i32).contains(&x) && (0..HEADLESS_H as i32).contains(&y) {
            self.framebuffer[y as usize * HEADLESS_W + x as usize] as i32
        } else {
            -1
        }
    }

    fn last_point(&self) -> (i32, i32) {
        self.last_xy
    }

    fn get(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Sprite> {
        let (x1, x2) = (x1.min(x2), x1.max(x2));
        let (y1, y2) = (y1.min(y2), y1.max(y2));
        let width = (x2 - x1 + 1).max(0) as u16;
        let height = (y2 - y1 + 1).max(0) as u16;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in y1..=y2 {
            for x in x1..=x2 {
                pixels.push(self.point(x, y).max(0) as u8);
            }
        }
        Ok(Sprite {
            width,
            height,
            pixels: Rc::new(pixels),
            palette_version: self.palette_version,
        })
    }

    fn put(&mut self, x: i32, y: i32, sprite: &Sprite, mode: PutMode) -> Result<()> {
        for dy in 0..sprite.height as i32 {
            for dx in 0..sprite.width as i32 {
                let src = sprite.pixels[(dy * sprite.width as i32 + dx) as usize] as i32;
                let (px, py) = (x + dx, y + dy);
                let dst = self.point(px, py).max(0);
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
        self.calls.push(format!("palette {index}={rgb}"));
    }

    fn palette_version(&self) -> u32 {
        self.palette_version
    }

    fn view(&mut self, coords: Option<(i32, i32, i32, i32)>, screen: bool) {
        self.calls.push(format!("view {coords:?} screen={screen}"));
    }

    fn window(&mut self, coords: Option<(f64, f64, f64, f64)>, screen: bool) {
        self.calls.push(format!("window {coords:?} screen={screen}"));
    }

    fn pcopy(&mut self, src: i32, dst: i32) {
        self.calls.push(format!("pcopy {src},{dst}"));
    }
}

/// Audio double: records every call.
#[derive(Debug, Default)]
pub struct HeadlessAudio {
    pub calls: Vec<String>,
}

impl Audio for HeadlessAudio {
    fn beep(&mut self) {
        self.calls.push("beep".into());
    }

    fn tone(&mut self, freq_hz: f64, ticks: f64) {
        self.calls.push(format!("sound {freq_hz} {ticks}"));
    }

    fn play_mml(&mut self, mml: &str) {
        self.calls.push(format!("play {mml}"));
    }

    fn queue_len(&self) -> usize {
        0
    }
}

/// Input double: scripted keys and lines.
#[derive(Debug, Default)]
pub struct HeadlessInput {
    pub keys: VecDeque<String>,
    pub lines: VecDeque<String>,
    pub trap_keys: VecDeque<u8>,
    pub held_scancodes: Vec<i32>,
    pub mouse: (i32, i32, i32),
}

impl Input for HeadlessInput {
    fn inkey(&mut self) -> Option<String> {
        self.keys.pop_front()
    }

    fn keydown(&self, scancode: i32) -> bool {
        self.held_scancodes.contains(&scancode)
    }

    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn mouse(&self) -> (i32, i32, i32) {
        self.mouse
    }

    fn stick(&self, _n: i32) -> i32 {
        0
    }

    fn strig(&mut self, _n: i32) -> bool {
        false
    }

    fn poll_trap_key(&mut self) -> Option<u8> {
        self.trap_keys.pop_front()
    }
}

/// Clock double: virtual time that only sleep advances.
#[derive(Debug, Default)]
pub struct HeadlessClock {
    pub now: f64,
}

impl Clock for HeadlessClock {
    fn timer(&self) -> f64 {
        self.now
    }

    fn sleep(&mut self, seconds: f64) {
        self.now += seconds.max(0.0);
    }

    fn date(&self) -> String {
        "01-01-1990".into()
    }

    fn time(&self) -> String {
        "00:00:00".into()
    }
}

/// The bundle tests construct.
pub struct HeadlessHost {
    pub surface: HeadlessSurface,
    pub audio: HeadlessAudio,
    pub input: HeadlessInput,
    pub files: crate::files::DiskFs,
    pub clock: HeadlessClock,
    pub cancel: bool,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        HeadlessHost {
            surface: HeadlessSurface::default(),
            audio: HeadlessAudio::default(),
            input: HeadlessInput::default(),
            files: crate::files::DiskFs::default(),
            clock: HeadlessClock::default(),
            cancel: false,
        }
    }
}

impl Host for HeadlessHost {
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
        self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_pixels_and_sprites() {
        let mut s = HeadlessSurface::default();
        s.pset(5, 5, Some(4));
        assert_eq!(s.point(5, 5), 4);
        assert_eq!(s.point(-1, 0), -1);
        let sprite = s.get(4, 4, 6, 6).unwrap();
        assert_eq!(sprite.width, 3);
        s.put(10, 10, &sprite, PutMode::Pset).unwrap();
        assert_eq!(s.point(11, 11), 4);
        // XOR with itself erases
        s.put(10, 10, &sprite, PutMode::Xor).unwrap();
        assert_eq!(s.point(11, 11), 0);
    }

    #[test]
    fn test_palette_version_bumps() {
        let mut s = HeadlessSurface::default();
        let v = s.palette_version();
        s.palette_set(1, 0x3F);
        assert_eq!(s.palette_version(), v + 1);
    }

    #[test]
    fn test_cursor_tracking() {
        let mut s = HeadlessSurface::default();
        s.print("abc");
        assert_eq!(s.cursor(), (1, 4));
        s.print("\n");
        assert_eq!(s.cursor(), (2, 1));
    }
}
