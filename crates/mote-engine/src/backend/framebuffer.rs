use std::collections::BTreeMap;
use std::fmt;

use super::{BackendLimits, TextureId};

/// Completeness of a framebuffer's attachment set.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FramebufferStatus {
    Complete,
    /// No framebuffer is bound (or the bound name was deleted).
    NotBound,
    NoAttachments,
    /// An active draw buffer has nothing attached.
    MissingAttachment { slot: u32 },
    /// The texture at `slot` has no storage yet.
    Unallocated { slot: u32 },
    /// The texture at `slot` differs in size from slot-order's first attachment.
    MismatchedDimensions { slot: u32 },
    /// The texture at `slot` is already attached to a lower slot.
    DuplicateAttachment { slot: u32 },
    TooManyAttachments { count: u32, max: u32 },
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::NotBound => f.write_str("no framebuffer bound"),
            Self::NoAttachments => f.write_str("no attachments"),
            Self::MissingAttachment { slot } => write!(f, "draw buffer {slot} has no attachment"),
            Self::Unallocated { slot } => write!(f, "attachment {slot} has no storage"),
            Self::MismatchedDimensions { slot } => {
                write!(f, "attachment {slot} differs in size from the others")
            }
            Self::DuplicateAttachment { slot } => {
                write!(f, "attachment {slot} repeats a texture already attached")
            }
            Self::TooManyAttachments { count, max } => {
                write!(f, "{count} color attachments requested, at most {max} supported")
            }
        }
    }
}

/// Attachment set and active draw buffers of one framebuffer.
///
/// A fresh framebuffer draws to slot 0 only, like GL's default.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FramebufferState {
    attachments: BTreeMap<u32, TextureId>,
    draw_buffers: Vec<u32>,
}

impl Default for FramebufferState {
    fn default() -> Self {
        Self {
            attachments: BTreeMap::new(),
            draw_buffers: vec![0],
        }
    }
}

impl FramebufferState {
    /// Attaches `texture` at `slot`, replacing whatever was there.
    /// Other slots are untouched.
    pub(crate) fn attach(&mut self, slot: u32, texture: TextureId) {
        self.attachments.insert(slot, texture);
    }

    /// Drops every attachment of `texture` (called when the texture is deleted).
    pub(crate) fn detach_texture(&mut self, texture: TextureId) {
        self.attachments.retain(|_, t| *t != texture);
    }

    pub(crate) fn set_draw_buffers(&mut self, slots: &[u32]) {
        self.draw_buffers = slots.to_vec();
    }

    pub fn attachment(&self, slot: u32) -> Option<TextureId> {
        self.attachments.get(&slot).copied()
    }

    /// `(slot, texture)` pairs in slot order.
    pub fn attachments(&self) -> impl Iterator<Item = (u32, TextureId)> + '_ {
        self.attachments.iter().map(|(&s, &t)| (s, t))
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn draw_buffers(&self) -> &[u32] {
        &self.draw_buffers
    }

    /// Evaluates completeness against `limits`, using `size_of` to look up
    /// allocated texture dimensions.
    pub fn status<F>(&self, limits: BackendLimits, size_of: F) -> FramebufferStatus
    where
        F: Fn(TextureId) -> Option<(u32, u32)>,
    {
        let Some(&highest) = self.attachments.keys().next_back() else {
            return FramebufferStatus::NoAttachments;
        };
        if highest >= limits.max_color_attachments {
            return FramebufferStatus::TooManyAttachments {
                count: highest + 1,
                max: limits.max_color_attachments,
            };
        }

        let mut expected: Option<(u32, u32)> = None;
        let mut seen: Vec<TextureId> = Vec::with_capacity(self.attachments.len());
        for (&slot, &texture) in &self.attachments {
            if seen.contains(&texture) {
                return FramebufferStatus::DuplicateAttachment { slot };
            }
            seen.push(texture);

            let Some(size) = size_of(texture) else {
                return FramebufferStatus::Unallocated { slot };
            };
            match expected {
                None => expected = Some(size),
                Some(first) if first != size => {
                    return FramebufferStatus::MismatchedDimensions { slot };
                }
                Some(_) => {}
            }
        }

        if let Some(&slot) = self
            .draw_buffers
            .iter()
            .find(|&&s| !self.attachments.contains_key(&s))
        {
            return FramebufferStatus::MissingAttachment { slot };
        }

        FramebufferStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(t: TextureId) -> Option<(u32, u32)> {
        match t.raw() {
            1..=3 => Some((4, 4)),
            4 => Some((8, 8)),
            _ => None,
        }
    }

    fn limits(max: u32) -> BackendLimits {
        BackendLimits {
            max_texture_side: 64,
            max_color_attachments: max,
        }
    }

    #[test]
    fn three_matching_slots_are_complete() {
        let mut fb = FramebufferState::default();
        for slot in 0..3 {
            fb.attach(slot, TextureId(slot + 1));
        }
        fb.set_draw_buffers(&[0, 1, 2]);
        assert_eq!(fb.status(limits(8), sized), FramebufferStatus::Complete);
    }

    #[test]
    fn empty_framebuffer_is_incomplete() {
        let fb = FramebufferState::default();
        assert_eq!(fb.status(limits(8), sized), FramebufferStatus::NoAttachments);
    }

    #[test]
    fn size_mismatch_is_reported_at_offending_slot() {
        let mut fb = FramebufferState::default();
        fb.attach(0, TextureId(1));
        fb.attach(1, TextureId(4));
        fb.set_draw_buffers(&[0, 1]);
        assert_eq!(
            fb.status(limits(8), sized),
            FramebufferStatus::MismatchedDimensions { slot: 1 }
        );
    }

    #[test]
    fn slot_beyond_limit_is_rejected() {
        let mut fb = FramebufferState::default();
        for slot in 0..3 {
            fb.attach(slot, TextureId(slot + 1));
        }
        assert_eq!(
            fb.status(limits(2), sized),
            FramebufferStatus::TooManyAttachments { count: 3, max: 2 }
        );
    }

    #[test]
    fn draw_buffer_without_attachment() {
        let mut fb = FramebufferState::default();
        fb.attach(0, TextureId(1));
        fb.set_draw_buffers(&[0, 1]);
        assert_eq!(
            fb.status(limits(8), sized),
            FramebufferStatus::MissingAttachment { slot: 1 }
        );
    }

    #[test]
    fn same_texture_twice() {
        let mut fb = FramebufferState::default();
        fb.attach(0, TextureId(1));
        fb.attach(1, TextureId(1));
        assert_eq!(
            fb.status(limits(8), sized),
            FramebufferStatus::DuplicateAttachment { slot: 1 }
        );
    }

    #[test]
    fn unallocated_texture() {
        let mut fb = FramebufferState::default();
        fb.attach(0, TextureId(9));
        assert_eq!(
            fb.status(limits(8), sized),
            FramebufferStatus::Unallocated { slot: 0 }
        );
    }
}
