//! Graphics and sound statements
//!
//! Evaluates operands and forwards to the surface/audio collaborators.
//! `STEP` coordinates resolve against the surface's last pen position.
//! Sprite `GET`/`PUT` parks the opaque capture on the target array, keyed
//! by the start offset the program named, and re-captures are the host's
//! concern via the palette version recorded on the sprite.

use qb_lang::error::{Result, RuntimeError};
use qb_lang::expr::Expr;
use qb_lang::stmt::{LValue, Stmt};
use tracing::warn;

use super::{Flow, Interp};
use crate::host::PutMode;

impl<'h> Interp<'h> {
    fn coord(&mut self, step: bool, x: &Expr, y: &Expr) -> Result<(i32, i32)> {
        let x = self.eval_expr(x)?.as_i32()?;
        let y = self.eval_expr(y)?.as_i32()?;
        if step {
            let (lx, ly) = self.host.surface().last_point();
            Ok((lx + x, ly + y))
        } else {
            Ok((x, y))
        }
    }

    fn opt_i32(&mut self, e: &Option<Expr>) -> Result<Option<i32>> {
        Ok(match e {
            Some(e) => Some(self.eval_expr(e)?.as_i32()?),
            None => None,
        })
    }

    fn opt_f64(&mut self, e: &Option<Expr>) -> Result<Option<f64>> {
        Ok(match e {
            Some(e) => Some(self.eval_expr(e)?.as_f64()?),
            None => None,
        })
    }

    pub(super) fn exec_gfx(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::ScreenStmt { mode } => {
                let mode = self.eval_expr(mode)?.as_i32()?;
                self.host.surface().mode_set(mode)?;
            }
            Stmt::Cls { arg } => {
                let arg = self.opt_i32(arg)?;
                self.host.surface().cls(arg);
            }
            Stmt::ColorStmt { fg, bg } => {
                let fg = self.opt_i32(fg)?;
                let bg = self.opt_i32(bg)?;
                self.host.surface().color(fg, bg);
            }
            Stmt::Locate { row, col, cursor } => {
                let row = self.opt_i32(row)?;
                let col = self.opt_i32(col)?;
                let cursor = self.opt_i32(cursor)?.map(|c| c != 0);
                self.host.surface().locate(row, col, cursor);
            }
            Stmt::WidthStmt { cols } => {
                let cols = self.eval_expr(cols)?.as_i32()?;
                self.host.surface().set_text_width(cols);
            }
            Stmt::Pset {
                preset,
                step,
                x,
                y,
                color,
            } => {
                let (x, y) = self.coord(*step, x, y)?;
                let color = self.opt_i32(color)?;
                if *preset {
                    self.host.surface().preset(x, y, color);
                } else {
                    self.host.surface().pset(x, y, color);
                }
            }
            Stmt::LineStmt {
                from,
                to,
                color,
                style,
            } => {
                let (x1, y1) = match from {
                    Some((step, x, y)) => self.coord(*step, x, y)?,
                    None => self.host.surface().last_point(),
                };
                let (step2, x2, y2) = to;
                let (x2, y2) = self.coord(*step2, x2, y2)?;
                let color = self.opt_i32(color)?;
                self.host.surface().line(x1, y1, x2, y2, color, *style);
            }
            Stmt::CircleStmt {
                step,
                x,
                y,
                r,
                color,
                start,
                end,
                aspect,
            } => {
                let (x, y) = self.coord(*step, x, y)?;
                let r = self.eval_expr(r)?.as_i32()?;
                let color = self.opt_i32(color)?;
                let start = self.opt_f64(start)?;
                let end = self.opt_f64(end)?;
                let aspect = self.opt_f64(aspect)?;
                self.host
                    .surface()
                    .circle(x, y, r, color, start, end, aspect);
            }
            Stmt::Paint {
                step,
                x,
                y,
                fill,
                border,
            } => {
                let (x, y) = self.coord(*step, x, y)?;
                let fill = self.opt_i32(fill)?;
                let border = self.opt_i32(border)?;
                self.host.surface().paint(x, y, fill, border);
            }
            Stmt::PaletteStmt { index, color } => match (index, color) {
                (Some(i), Some(c)) => {
                    let i = self.eval_expr(i)?.as_i32()?;
                    let c = self.eval_expr(c)?.as_i32()?;
                    self.host.surface().palette_set(i, c);
                }
                _ => {
                    // Bare PALETTE restores the default mapping
                    self.host.surface().palette_set(-1, -1);
                }
            },
            Stmt::ViewStmt {
                screen,
                coords,
                fill,
                border,
            } => {
                let coords = match coords {
                    Some((x1, y1, x2, y2)) => {
                        let x1 = self.eval_expr(x1)?.as_i32()?;
                        let y1 = self.eval_expr(y1)?.as_i32()?;
                        let x2 = self.eval_expr(x2)?.as_i32()?;
                        let y2 = self.eval_expr(y2)?.as_i32()?;
                        Some((x1, y1, x2, y2))
                    }
                    None => None,
                };
                self.opt_i32(fill)?;
                self.opt_i32(border)?;
                self.host.surface().view(coords, *screen);
            }
            Stmt::WindowStmt { screen, coords } => {
                let coords = match coords {
                    Some((x1, y1, x2, y2)) => {
                        let x1 = self.eval_expr(x1)?.as_f64()?;
                        let y1 = self.eval_expr(y1)?.as_f64()?;
                        let x2 = self.eval_expr(x2)?.as_f64()?;
                        let y2 = self.eval_expr(y2)?.as_f64()?;
                        Some((x1, y1, x2, y2))
                    }
                    None => None,
                };
                self.host.surface().window(coords, *screen);
            }
            Stmt::Pcopy { src, dst } => {
                let src = self.eval_expr(src)?.as_i32()?;
                let dst = self.eval_expr(dst)?.as_i32()?;
                self.host.surface().pcopy(src, dst);
            }
            Stmt::GfxGet {
                step1,
                x1,
                y1,
                step2,
                x2,
                y2,
                array,
            } => {
                let (x1, y1) = self.coord(*step1, x1, y1)?;
                let (x2, y2) = self.coord(*step2, x2, y2)?;
                let sprite = self.host.surface().get(x1, y1, x2, y2)?;
                let (arr, start) = self.sprite_slot(array)?;
                arr.borrow_mut().sprites.insert(start, sprite);
            }
            Stmt::GfxPut {
                step,
                x,
                y,
                array,
                mode,
            } => {
                let (x, y) = self.coord(*step, x, y)?;
                let mode = match mode {
                    Some(word) => PutMode::from_word(word).ok_or_else(|| {
                        RuntimeError::syntax(format!("bad PUT mode {word}"))
                    })?,
                    None => PutMode::Xor,
                };
                let (arr, start) = self.sprite_slot(array)?;
                let sprite = arr.borrow().sprites.get(&start).cloned();
                let sprite = sprite.ok_or_else(|| {
                    RuntimeError::illegal_call("PUT before GET captured a sprite")
                })?;
                if sprite.palette_version != self.host.surface().palette_version() {
                    warn!("sprite drawn with a stale palette capture");
                }
                self.host.surface().put(x, y, &sprite, mode)?;
            }
            Stmt::Beep => self.host.audio().beep(),
            Stmt::Sound { freq, ticks } => {
                let freq = self.eval_expr(freq)?.as_f64()?;
                let ticks = self.eval_expr(ticks)?.as_f64()?;
                if !(37.0..=32767.0).contains(&freq) {
                    return Err(RuntimeError::illegal_call(format!("SOUND {freq}")));
                }
                self.host.audio().tone(freq, ticks);
            }
            Stmt::Play { mml } => {
                let mml = self.eval_expr(mml)?.into_string()?;
                self.host.audio().play_mml(&mml);
            }
            _ => unreachable!("exec_gfx got a non-graphics statement"),
        }
        Ok(Flow::Next)
    }

    /// The array and start offset a sprite GET/PUT names.
    fn sprite_slot(&mut self, lv: &LValue) -> Result<(crate::scope::ArrayCell, usize)> {
        let arr = self.array_for(&lv.name, lv.indices.len().max(1))?;
        let start = if lv.indices.is_empty() {
            0
        } else {
            let idx = self.eval_subscripts(&lv.indices)?;
            arr.borrow().offset(&idx)?
        };
        Ok((arr, start))
    }
}
