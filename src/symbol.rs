use std::fmt;
use std::str::FromStr;

/// Represents the CPU registers.
///
/// Ordering matches the canonical name table, so `as usize` is a stable index
/// into the register file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    /// Also addressable as `fp`, the frame pointer.
    R12,
    /// Stack pointer.
    Sp,
    /// Link register, holds the return address of the active subroutine.
    Lr,
    /// Program counter. During execution this is an instruction index, not a
    /// byte address.
    Pc,
    /// Application program status register. Held in the file for dump
    /// purposes; flags live separately.
    Apsr,
}

/// Canonical register names in index order.
pub const REGISTER_NAMES: [&str; 17] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "apsr",
];

pub const REGISTER_COUNT: usize = REGISTER_NAMES.len();

impl Register {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Register::*;
        Ok(match s {
            "r0" => R0,
            "r1" => R1,
            "r2" => R2,
            "r3" => R3,
            "r4" => R4,
            "r5" => R5,
            "r6" => R6,
            "r7" => R7,
            "r8" => R8,
            "r9" => R9,
            "r10" => R10,
            "r11" => R11,
            // `fp` is an alias the GNU assembler emits for r12 frames
            "r12" | "fp" => R12,
            "sp" => Sp,
            "lr" => Lr,
            "pc" => Pc,
            "apsr" => Apsr,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REGISTER_NAMES[self.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_ordering() {
        for (i, name) in REGISTER_NAMES.iter().enumerate() {
            let reg: Register = name.parse().unwrap();
            assert_eq!(reg.index(), i, "register {name} out of order");
            assert_eq!(reg.to_string(), *name);
        }
    }

    #[test]
    fn fp_aliases_r12() {
        assert_eq!("fp".parse::<Register>(), Ok(Register::R12));
        assert_eq!("r12".parse::<Register>(), Ok(Register::R12));
    }

    #[test]
    fn unknown_name_rejected() {
        assert!("r13".parse::<Register>().is_err());
        assert!("x0".parse::<Register>().is_err());
        assert!("".parse::<Register>().is_err());
    }
}
