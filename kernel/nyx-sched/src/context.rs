//! Saved general-register frame for a suspended process.
//!
//! Layout mirrors the source workspace's `UserRegisters`: the dispatcher
//! saves the full general-register set here on syscall entry and restores
//! it on return, after overwriting `rax` with the syscall result (spec
//! 4.3, "Context save/restore").

/// A process's saved general-purpose register state.
///
/// A freshly allocated slot has no real saved context; `has_context` is
/// `false` until the first syscall entry populates one, and the slot is
/// instead resumed by synthesizing a frame from `user_ip`/`user_sp` with
/// the rest of the registers zeroed (spec 4.3).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}

impl Context {
    /// An all-zero context, used to reset a slot on allocation.
    pub const fn zeroed() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rsp: 0,
            rflags: 0,
        }
    }

    /// Synthesizes a frame for a slot with no saved context, entering at
    /// `user_ip` with stack pointer `user_sp` and every other register
    /// zeroed (spec 4.3: "a slot with `has_context=false` is resumed by
    /// synthesizing a frame using `user_ip`, `user_sp`, and zeroed
    /// registers").
    pub const fn synthesize(user_ip: u64, user_sp: u64) -> Self {
        let mut ctx = Self::zeroed();
        ctx.rip = user_ip;
        ctx.rsp = user_sp;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_is_all_zero() {
        let ctx = Context::zeroed();
        assert_eq!(ctx.rax, 0);
        assert_eq!(ctx.rip, 0);
        assert_eq!(ctx.rflags, 0);
    }

    #[test]
    fn synthesize_sets_only_ip_and_sp() {
        let ctx = Context::synthesize(0x4000_1000, 0x7fff_0000);
        assert_eq!(ctx.rip, 0x4000_1000);
        assert_eq!(ctx.rsp, 0x7fff_0000);
        assert_eq!(ctx.rax, 0);
        assert_eq!(ctx.rbx, 0);
    }
}
