//! Transaction fee estimation
//!
//! A fixed estimated-bytes-per-input/output model. The estimator is pure
//! and deterministic: the same (inputs, outputs, rate) triple always yields
//! the same fee, and tests rely on literal fee values.

/// Fixed transaction overhead in virtual bytes (version, locktime,
/// input/output counts, segwit marker).
pub const TX_OVERHEAD_VBYTES: u64 = 11;

/// Estimated virtual bytes per taproot key-spend input.
pub const INPUT_VBYTES: u64 = 55;

/// Estimated virtual bytes per output.
pub const OUTPUT_VBYTES: u64 = 31;

/// Fee in satoshis for a transaction with the given shape at `fee_rate`
/// sat/vB.
pub fn calculate_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    let vbytes =
        TX_OVERHEAD_VBYTES + inputs as u64 * INPUT_VBYTES + outputs as u64 * OUTPUT_VBYTES;
    vbytes * fee_rate
}

/// Fee estimate used while UTXO selection is still accumulating inputs.
///
/// Selection recomputes this as each candidate is added, since every extra
/// input raises the fee. Kept as a named call distinct from [`final_fee`]:
/// the two are invoked with different (input, output) counts, selection's
/// before the final transaction shape is known.
pub fn estimate_for_selection(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    calculate_fee(inputs, outputs, fee_rate)
}

/// Fee for the assembled transaction, computed from the final actual
/// input/output counts (change output included).
pub fn final_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    calculate_fee(inputs, outputs, fee_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(calculate_fee(3, 4, 5), 1_500);
        }
        assert_eq!(estimate_for_selection(3, 4, 5), final_fee(3, 4, 5));
    }

    #[test]
    fn test_fee_literals() {
        // 11 + 3*55 + 4*31 = 300 vbytes
        assert_eq!(calculate_fee(3, 4, 5), 1_500);
        // 11 + 55 + 31 = 97 vbytes
        assert_eq!(calculate_fee(1, 1, 1), 97);
        assert_eq!(calculate_fee(0, 0, 10), 110);
    }

    #[test]
    fn test_fee_strictly_increasing() {
        let base = calculate_fee(2, 2, 5);
        assert!(calculate_fee(3, 2, 5) > base);
        assert!(calculate_fee(2, 3, 5) > base);
        assert!(calculate_fee(2, 2, 6) > base);
    }
}
