//! Event traps: ON KEY(n)/TIMER(n)/STRIG(n)/PEN/PLAY(n) GOSUB
//!
//! Each trap is `(handler line, state)` with state Off/On/Stopped. Off
//! discards events, On fires, Stopped holds at most one pending event until
//! re-enabled. Firing is a synthetic GOSUB performed between statements by
//! the executor; while the handler runs, that trap is masked, and the
//! matching RETURN unmasks it atomically.

use std::collections::HashMap;

use qb_lang::stmt::{EventAction, EventKind};
use tracing::debug;

use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapId {
    Key(u8),
    Timer,
    Strig(u8),
    Pen,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrapState {
    Off,
    On,
    Stopped,
}

#[derive(Debug, Clone)]
struct Trap {
    target: usize,
    state: TrapState,
    pending: bool,
    masked: bool,
}

impl Trap {
    fn new(target: usize) -> Trap {
        Trap {
            target,
            state: TrapState::Off,
            pending: false,
            masked: false,
        }
    }

    /// Record an event occurrence per state; true when it should fire now.
    fn notice(&mut self) -> bool {
        match self.state {
            TrapState::Off => false,
            TrapState::Stopped => {
                self.pending = true;
                false
            }
            TrapState::On => {
                if self.masked {
                    self.pending = true;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// A pending event becomes deliverable once enabled and unmasked.
    fn take_pending(&mut self) -> bool {
        if self.state == TrapState::On && !self.masked && self.pending {
            self.pending = false;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default)]
pub struct EventTraps {
    key: HashMap<u8, Trap>,
    strig: HashMap<u8, Trap>,
    timer: Option<(f64, f64, Trap)>,
    pen: Option<Trap>,
    play: Option<(usize, usize, Trap)>,
    strig_last: HashMap<u8, bool>,
    pen_last: bool,
}

impl EventTraps {
    /// `ON <event> GOSUB target` installs (or retargets) a trap. The trap
    /// starts Off until `<event> ON`.
    pub fn install(&mut self, id: TrapId, target: usize, param: f64) {
        debug!(?id, target, "installing event trap");
        match id {
            TrapId::Key(n) => {
                self.key.insert(n, Trap::new(target));
            }
            TrapId::Strig(n) => {
                self.strig.insert(n, Trap::new(target));
            }
            TrapId::Timer => {
                self.timer = Some((param.max(1.0), f64::NEG_INFINITY, Trap::new(target)));
            }
            TrapId::Pen => {
                self.pen = Some(Trap::new(target));
            }
            TrapId::Play => {
                self.play = Some((param.max(1.0) as usize, usize::MAX, Trap::new(target)));
            }
        }
    }

    pub fn control(&mut self, kind: EventKind, index: Option<u8>, action: EventAction) {
        let state = match action {
            EventAction::On => TrapState::On,
            EventAction::Off => TrapState::Off,
            EventAction::Stop => TrapState::Stopped,
        };
        let apply = |t: &mut Trap| {
            t.state = state;
            if state == TrapState::Off {
                t.pending = false;
            }
        };
        match (kind, index) {
            (EventKind::Key, Some(n)) => {
                if let Some(t) = self.key.get_mut(&n) {
                    apply(t);
                }
            }
            (EventKind::Key, None) => {
                for t in self.key.values_mut() {
                    apply(t);
                }
            }
            (EventKind::Strig, Some(n)) => {
                if let Some(t) = self.strig.get_mut(&n) {
                    apply(t);
                }
            }
            (EventKind::Strig, None) => {
                for t in self.strig.values_mut() {
                    apply(t);
                }
            }
            (EventKind::Timer, _) => {
                if let Some((_, last, t)) = self.timer.as_mut() {
                    if state == TrapState::On && t.state != TrapState::On {
                        *last = f64::NEG_INFINITY;
                    }
                    apply(t);
                }
            }
            (EventKind::Pen, _) => {
                if let Some(t) = self.pen.as_mut() {
                    apply(t);
                }
            }
            (EventKind::Play, _) => {
                if let Some((_, _, t)) = self.play.as_mut() {
                    apply(t);
                }
            }
        }
    }

    /// Handler finished (`RETURN`): unmask so the trap can fire again.
    pub fn unmask(&mut self, id: TrapId) {
        if let Some(t) = self.trap_mut(id) {
            t.masked = false;
        }
    }

    fn trap_mut(&mut self, id: TrapId) -> Option<&mut Trap> {
        match id {
            TrapId::Key(n) => self.key.get_mut(&n),
            TrapId::Strig(n) => self.strig.get_mut(&n),
            TrapId::Timer => self.timer.as_mut().map(|(_, _, t)| t),
            TrapId::Pen => self.pen.as_mut(),
            TrapId::Play => self.play.as_mut().map(|(_, _, t)| t),
        }
    }

    /// Polling point between statements: collect host events, then return
    /// one deliverable trap, masking it. Returns the handler's line index.
    pub fn poll(&mut self, host: &mut dyn Host) -> Option<(TrapId, usize)> {
        // Keyboard: edge events from the host's trap queue. The queue is
        // only tapped while some key trap is On or Stopped, so keystrokes
        // before the program enables trapping are not silently eaten.
        if self
            .key
            .values()
            .any(|t| t.state != TrapState::Off)
        {
            while let Some(slot) = host.input().poll_trap_key() {
                if let Some(t) = self.key.get_mut(&slot)
                    && t.notice()
                {
                    t.pending = true;
                }
            }
        }

        // Timer: interval elapsed
        if let Some((interval, last, t)) = self.timer.as_mut() {
            if t.state == TrapState::On {
                let now = host.clock().timer();
                if *last == f64::NEG_INFINITY {
                    *last = now;
                } else if now - *last >= *interval {
                    *last = now;
                    if t.notice() {
                        t.pending = true;
                    }
                }
            }
        }

        // Joystick buttons: edge on press
        let strig_slots: Vec<u8> = self.strig.keys().copied().collect();
        for n in strig_slots {
            let down = host.input().strig(n as i32);
            let last = self.strig_last.insert(n, down).unwrap_or(false);
            if down && !last {
                if let Some(t) = self.strig.get_mut(&n)
                    && t.notice()
                {
                    t.pending = true;
                }
            }
        }

        // Pen (mouse button) edge
        if let Some(t) = self.pen.as_mut() {
            let down = host.input().mouse().2 != 0;
            let was = self.pen_last;
            self.pen_last = down;
            if down && !was && t.notice() {
                t.pending = true;
            }
        }

        // Background music queue dropping below the threshold
        if let Some((threshold, last_len, t)) = self.play.as_mut() {
            let len = host.audio().queue_len();
            if len < *threshold && *last_len >= *threshold && t.notice() {
                t.pending = true;
            }
            *last_len = len;
        }

        self.deliver()
    }

    /// Hand out one pending trap, masking it until its RETURN.
    fn deliver(&mut self) -> Option<(TrapId, usize)> {
        let ids: Vec<TrapId> = self
            .key
            .keys()
            .map(|n| TrapId::Key(*n))
            .chain([TrapId::Timer, TrapId::Pen, TrapId::Play])
            .chain(self.strig.keys().map(|n| TrapId::Strig(*n)))
            .collect();
        for id in ids {
            if let Some(t) = self.trap_mut(id)
                && t.take_pending()
            {
                t.masked = true;
                debug!(?id, target = t.target, "dispatching event trap");
                return Some((id, t.target));
            }
        }
        None
    }

    /// `CLEAR`/`RUN` drop all traps.
    pub fn reset(&mut self) {
        *self = EventTraps::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;

    #[test]
    fn test_key_trap_fires_once_enabled() {
        let mut traps = EventTraps::default();
        let mut host = HeadlessHost::default();
        traps.install(TrapId::Key(1), 42, 0.0);

        host.input.trap_keys.push_back(1);
        // Off: the queue is not tapped, nothing fires
        assert!(traps.poll(&mut host).is_none());

        traps.control(EventKind::Key, Some(1), EventAction::On);
        host.input.trap_keys.push_back(1);
        assert_eq!(traps.poll(&mut host), Some((TrapId::Key(1), 42)));
    }

    #[test]
    fn test_stopped_queues_one_event() {
        let mut traps = EventTraps::default();
        let mut host = HeadlessHost::default();
        traps.install(TrapId::Key(5), 7, 0.0);
        traps.control(EventKind::Key, Some(5), EventAction::Stop);

        host.input.trap_keys.push_back(5);
        host.input.trap_keys.push_back(5);
        assert!(traps.poll(&mut host).is_none());

        // Re-enable: exactly one pending delivery
        traps.control(EventKind::Key, Some(5), EventAction::On);
        assert_eq!(traps.poll(&mut host), Some((TrapId::Key(5), 7)));
        assert!(traps.poll(&mut host).is_none());
    }

    #[test]
    fn test_masked_until_unmask() {
        let mut traps = EventTraps::default();
        let mut host = HeadlessHost::default();
        traps.install(TrapId::Key(1), 3, 0.0);
        traps.control(EventKind::Key, Some(1), EventAction::On);

        host.input.trap_keys.push_back(1);
        assert!(traps.poll(&mut host).is_some());

        // Same key again while the handler runs: queued, not delivered
        host.input.trap_keys.push_back(1);
        assert!(traps.poll(&mut host).is_none());

        traps.unmask(TrapId::Key(1));
        assert_eq!(traps.poll(&mut host), Some((TrapId::Key(1), 3)));
    }

    #[test]
    fn test_timer_interval() {
        let mut traps = EventTraps::default();
        let mut host = HeadlessHost::default();
        traps.install(TrapId::Timer, 9, 2.0);
        traps.control(EventKind::Timer, None, EventAction::On);

        assert!(traps.poll(&mut host).is_none());
        host.clock.now = 1.0;
        assert!(traps.poll(&mut host).is_none());
        host.clock.now = 2.5;
        assert_eq!(traps.poll(&mut host), Some((TrapId::Timer, 9)));
        // Interval restarts after firing
        host.clock.now = 3.0;
        traps.unmask(TrapId::Timer);
        assert!(traps.poll(&mut host).is_none());
    }
}
