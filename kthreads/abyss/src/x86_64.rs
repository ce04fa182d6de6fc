//! x86_64 registers modelled by the machine layer.

bitflags::bitflags! {
    /// The RFLAGS register.
    ///
    /// Only the interrupt enable flag is consulted by the thread core, but the
    /// register keeps its architectural layout.
    pub struct Rflags: u64 {
        /// Carry flag.
        const CF = 1 << 0;
        #[doc(hidden)] const _RSVD_1 = 1 << 1;
        /// Parity flag.
        const PF = 1 << 2;
        /// Auxiliary carry flag.
        const AF = 1 << 4;
        /// Zero flag.
        const ZF = 1 << 6;
        /// Sign flag.
        const SF = 1 << 7;
        /// Trap flag.
        const TF = 1 << 8;
        /// Interrupt enable flag. Maskable interrupts are delivered only while
        /// this flag is set.
        const IF = 1 << 9;
        /// Direction flag.
        const DF = 1 << 10;
        /// Overflow flag.
        const OF = 1 << 11;
    }
}

impl Rflags {
    /// The register value after reset: interrupts disabled and the always-one
    /// reserved bit set.
    pub const RESET: u64 = 0x2;
}
