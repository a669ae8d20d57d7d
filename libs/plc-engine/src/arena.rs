use rhai::Dynamic;

/// Generational index into a [`HandleArena`].
/// A handle from before a release or drain never resolves again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NativeHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    value: Option<Dynamic>,
}

/// Per-call registry of protected native values.
///
/// Everything a call produces is protected here until the call is cleaned up.
/// Each protected value is released exactly once, either explicitly or by
/// [`drain`](Self::drain).
#[derive(Debug, Default)]
pub struct HandleArena {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
    protected_total: u64,
    released_total: u64,
}

impl HandleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(&mut self, value: Dynamic) -> NativeHandle {
        self.live += 1;
        self.protected_total += 1;
        if let Some(index) = self.free_list.pop() {
            // Reuse freed slot, bump generation
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            NativeHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            NativeHandle {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, handle: NativeHandle) -> Option<&Dynamic> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
    }

    /// Release one value. Returns `false` if the handle was already released.
    pub fn release(&mut self, handle: NativeHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.value.take().is_none() {
            return false;
        }
        self.free_list.push(handle.index);
        self.live -= 1;
        self.released_total += 1;
        true
    }

    /// Release every live value. Returns how many were released.
    pub fn drain(&mut self) -> usize {
        let mut released = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                self.free_list.push(index as u32);
                released += 1;
            }
        }
        self.live -= released;
        self.released_total += released as u64;
        released
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// (protected, released) since the arena was created.
    pub fn totals(&self) -> (u64, u64) {
        (self.protected_total, self.released_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_exactly_once() {
        let mut arena = HandleArena::new();
        let h = arena.protect(Dynamic::from_int(7));
        assert_eq!(arena.get(h).and_then(|v| v.as_int().ok()), Some(7));
        assert!(arena.release(h));
        assert!(!arena.release(h));
        assert!(arena.get(h).is_none());
        assert_eq!(arena.live(), 0);
        assert_eq!(arena.totals(), (1, 1));
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut arena = HandleArena::new();
        let old = arena.protect(Dynamic::from_int(1));
        arena.release(old);
        let new = arena.protect(Dynamic::from_int(2));
        assert!(arena.get(old).is_none());
        assert!(!arena.release(old));
        assert_eq!(arena.get(new).and_then(|v| v.as_int().ok()), Some(2));
    }

    #[test]
    fn drain_releases_everything_once() {
        let mut arena = HandleArena::new();
        let a = arena.protect(Dynamic::UNIT);
        arena.protect(Dynamic::from_bool(true));
        arena.protect(Dynamic::from_float(1.5));
        assert!(arena.release(a));

        assert_eq!(arena.drain(), 2);
        assert_eq!(arena.drain(), 0);
        assert_eq!(arena.live(), 0);
        assert_eq!(arena.totals(), (3, 3));
    }
}
