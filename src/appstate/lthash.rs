use hkdf::Hkdf;
use sha2::Sha256;

/// Summation-based hash maintaining the integrity digest of a sequence of
/// mutations. Addition and removal commute, so any valid application
/// order of the same mutation set yields the same accumulator.
#[derive(Clone, Debug)]
pub struct LtHash {
    pub hkdf_info: &'static [u8],
    pub hkdf_size: u8,
}

/// Instance used for app state patch integrity.
pub const WA_PATCH_INTEGRITY: LtHash = LtHash {
    hkdf_info: b"WhatsApp Patch Integrity",
    hkdf_size: 128,
};

impl LtHash {
    pub fn subtract_then_add_in_place(
        &self,
        base: &mut [u8],
        subtract: &[impl AsRef<[u8]>],
        add: &[impl AsRef<[u8]>],
    ) {
        self.multiple_op(base, subtract, true);
        self.multiple_op(base, add, false);
    }

    fn multiple_op(&self, base: &mut [u8], input: &[impl AsRef<[u8]>], subtract: bool) {
        for item in input {
            let derived = hkdf_expand(item.as_ref(), self.hkdf_info, self.hkdf_size);
            pointwise_with_overflow(base, &derived, subtract);
        }
    }
}

/// Lane-wise u16 little-endian wrapping add/sub.
fn pointwise_with_overflow(base: &mut [u8], input: &[u8], subtract: bool) {
    assert_eq!(base.len(), input.len(), "length mismatch");
    let mut i = 0;
    while i < base.len() {
        let x = u16::from_le_bytes([base[i], base[i + 1]]);
        let y = u16::from_le_bytes([input[i], input[i + 1]]);
        let result = if subtract {
            x.wrapping_sub(y)
        } else {
            x.wrapping_add(y)
        };
        base[i..i + 2].copy_from_slice(&result.to_le_bytes());
        i += 2;
    }
}

fn hkdf_expand(key: &[u8], info: &[u8], length: u8) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, key);
    let mut okm = vec![0u8; length as usize];
    hk.expand(info, &mut okm).expect("hkdf expand");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_subtract_restores_base() {
        let mut base = vec![0u8; 128];
        let item = vec![1u8, 2, 3];
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(
            &mut base,
            &[] as &[&[u8]],
            std::slice::from_ref(&item),
        );
        assert_ne!(base, vec![0u8; 128]);
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(&mut base, &[item], &[] as &[&[u8]]);
        assert_eq!(base, vec![0u8; 128]);
    }

    #[test]
    fn accumulation_is_order_independent() {
        let a = vec![10u8; 32];
        let b = vec![20u8; 32];
        let c = vec![30u8; 32];

        let mut forward = vec![0u8; 128];
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(
            &mut forward,
            &[] as &[&[u8]],
            &[a.clone(), b.clone(), c.clone()],
        );

        let mut reversed = vec![0u8; 128];
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(
            &mut reversed,
            &[] as &[&[u8]],
            &[c, b, a],
        );

        assert_eq!(forward, reversed);
    }

    #[test]
    fn split_application_equals_batch_application() {
        let items: Vec<Vec<u8>> = (0u8..6).map(|i| vec![i; 32]).collect();

        let mut batch = vec![0u8; 128];
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(&mut batch, &[] as &[&[u8]], &items);

        let mut split = vec![0u8; 128];
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(
            &mut split,
            &[] as &[&[u8]],
            &items[..3],
        );
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(
            &mut split,
            &[] as &[&[u8]],
            &items[3..],
        );

        assert_eq!(batch, split);
    }
}
