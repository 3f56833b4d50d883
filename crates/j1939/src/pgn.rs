//! Parameter group numbers used by the protocol core

/// Request (PGN 59904), destination folded into the low byte
pub const REQUEST: u32 = 0xEA00;
/// Acknowledgment (PGN 59392)
pub const ACKNOWLEDGMENT: u32 = 0xE800;
/// Transport Protocol connection management (PGN 60416)
pub const TP_CM: u32 = 0xEC00;
/// Transport Protocol data transfer (PGN 60160)
pub const TP_DT: u32 = 0xEB00;
/// DM7 command non-continuously monitored test (PGN 58112)
pub const DM7: u32 = 0xE300;
/// DM30 scaled test results (PGN 41984)
pub const DM30: u32 = 0xA400;

/// Largest value a PGN can take (18 bits)
pub const MAX: u32 = 0x3FFFF;

/// PDU1 PGNs (PF < 240) carry a destination address in their low byte
pub fn is_pdu1(pgn: u32) -> bool {
    ((pgn >> 8) & 0xFF) < 0xF0
}

/// Strip the destination byte from a PDU1 identifier; PDU2 values pass through
pub fn mask(id: u32) -> u32 {
    if is_pdu1(id) {
        id & 0x3FF00
    } else {
        id & MAX
    }
}

/// True for the two Transport Protocol PGNs
pub fn is_transport(pgn: u32) -> bool {
    let pgn = mask(pgn);
    pgn == TP_CM || pgn == TP_DT
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0xEA00, true)]
    #[case(0xEAFF, true)]
    #[case(0xEFFF, true)]
    #[case(0xF000, false)]
    #[case(0xFECA, false)]
    #[case(0x1EA00, true)]
    fn test_is_pdu1(#[case] pgn: u32, #[case] expected: bool) {
        assert_eq!(is_pdu1(pgn), expected);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(0xEA17), 0xEA00);
        assert_eq!(mask(0xFECA), 0xFECA);
        assert_eq!(mask(0x1E8FF), 0x1E800);
    }

    #[test]
    fn test_is_transport() {
        assert!(is_transport(0xEC00));
        assert!(is_transport(0xECF9));
        assert!(is_transport(0xEBFF));
        assert!(!is_transport(0xEA00));
    }
}
