use crate::state::BufferRole;

/// Ring order: each current role is followed by its scratch, then by the
/// next current role.
const RING: [BufferRole; 4] = [
    BufferRole::A,
    BufferRole::Rk2A,
    BufferRole::B,
    BufferRole::Rk2B,
];

/// Role bookkeeping for the four snapshots.
///
/// `A -> (scratch RK2_A) -> B -> (scratch RK2_B) -> A`. The current role
/// alternates between `A` and `B`, and each uses its own scratch snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RoleRing {
    /// Index into [`RING`] of the current role; always 0 or 2.
    head: usize,
}

impl RoleRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the next frame reads from.
    pub fn current(&self) -> BufferRole {
        RING[self.head]
    }

    /// Snapshot holding the Euler prediction for the current frame.
    pub fn scratch(&self) -> BufferRole {
        RING[self.head + 1]
    }

    /// Snapshot the current frame's result is written to.
    pub fn next(&self) -> BufferRole {
        RING[(self.head + 2) % RING.len()]
    }

    /// Makes [`next`](Self::next) the current role.
    pub fn advance(&mut self) {
        self.head = (self.head + 2) % RING.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_a() {
        let ring = RoleRing::new();
        assert_eq!(ring.current(), BufferRole::A);
        assert_eq!(ring.scratch(), BufferRole::Rk2A);
        assert_eq!(ring.next(), BufferRole::B);
    }

    #[test]
    fn advancing_swaps_current_and_next() {
        let mut ring = RoleRing::new();
        ring.advance();
        assert_eq!(ring.current(), BufferRole::B);
        assert_eq!(ring.scratch(), BufferRole::Rk2B);
        assert_eq!(ring.next(), BufferRole::A);
        ring.advance();
        assert_eq!(ring, RoleRing::new());
    }

    #[test]
    fn roles_of_a_frame_are_distinct() {
        let mut ring = RoleRing::new();
        for _ in 0..4 {
            let roles = [ring.current(), ring.scratch(), ring.next()];
            assert_ne!(roles[0], roles[1]);
            assert_ne!(roles[1], roles[2]);
            assert_ne!(roles[0], roles[2]);
            ring.advance();
        }
    }
}
