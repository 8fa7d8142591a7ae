//! threshold secret sharing using shamir's scheme over GF(256)
//!
//! the 32-byte quorum key is shared bytewise: every byte gets its own random
//! polynomial of degree `threshold - 1` whose constant term is that byte.
//! shares are evaluated at x = 1..=n, so at most 255 members are possible.
//!
//! reconstruction interpolates at x = 0 from the first `threshold` distinct
//! shares and uses every additional share as a consistency check.

use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{Error, Result};

/// length of the shared secret
pub const SECRET_LEN: usize = 32;

/// length of a serialized share: x-coordinate followed by the y bytes
pub const SHARE_LEN: usize = 1 + SECRET_LEN;

/// a single share: one point per secret byte, all at the same x
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate (1-indexed, never zero)
    pub x: u8,
    /// polynomial values at `x`, one per secret byte
    pub y: [u8; SECRET_LEN],
}

impl Share {
    pub fn to_bytes(&self) -> Zeroizing<[u8; SHARE_LEN]> {
        let mut out = Zeroizing::new([0u8; SHARE_LEN]);
        out[0] = self.x;
        out[1..].copy_from_slice(&self.y);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARE_LEN {
            return Err(Error::InvalidParameters(format!(
                "share must be {} bytes, got {}",
                SHARE_LEN,
                bytes.len()
            )));
        }
        if bytes[0] == 0 {
            return Err(Error::InvalidParameters("share x-coordinate must be non-zero".into()));
        }
        let mut y = [0u8; SECRET_LEN];
        y.copy_from_slice(&bytes[1..]);
        Ok(Self { x: bytes[0], y })
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share").field("x", &self.x).finish_non_exhaustive()
    }
}

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
///
/// branch-free so share bytes do not leak through timing
fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    for _ in 0..8 {
        result ^= a & 0u8.wrapping_sub(b & 1);
        let carry = 0u8.wrapping_sub(a >> 7);
        a = (a << 1) ^ (0x1b & carry);
        b >>= 1;
    }
    result
}

/// GF(256) multiplicative inverse, a^254 = a^(-1)
fn gf256_inv(a: u8) -> u8 {
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

/// evaluate `constant + coeffs[0]*x + coeffs[1]*x^2 + ...` (horner)
fn poly_eval(constant: u8, coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf256_mul(acc, x) ^ c;
    }
    gf256_mul(acc, x) ^ constant
}

/// lagrange interpolation of the points (xs[i], ys[i]) evaluated at `at`
///
/// xs must be distinct and non-zero
fn interpolate(xs: &[u8], ys: &[u8], at: u8) -> u8 {
    let mut result = 0u8;

    for (i, (&xi, &yi)) in xs.iter().zip(ys).enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;

        for (j, &xj) in xs.iter().enumerate() {
            if i != j {
                num = gf256_mul(num, at ^ xj); // (at - xj)
                den = gf256_mul(den, xi ^ xj); // (xi - xj)
            }
        }

        result ^= gf256_mul(yi, gf256_mul(num, gf256_inv(den)));
    }

    result
}

/// split a 32-byte secret into `member_count` shares, any `threshold` of
/// which reconstruct it
pub fn split(secret: &[u8; SECRET_LEN], threshold: u8, member_count: u8) -> Result<Vec<Share>> {
    if member_count == 0 {
        return Err(Error::InvalidParameters("member count must be at least 1".into()));
    }
    if threshold == 0 || threshold > member_count {
        return Err(Error::InvalidParameters(format!(
            "threshold must be within 1..={}, got {}",
            member_count, threshold
        )));
    }

    let mut rng = OsRng;
    let mut coeffs = Zeroizing::new(vec![0u8; threshold as usize - 1]);
    let mut shares: Vec<Share> = (1..=member_count)
        .map(|x| Share { x, y: [0u8; SECRET_LEN] })
        .collect();

    for i in 0..SECRET_LEN {
        rng.fill_bytes(&mut coeffs);
        for share in shares.iter_mut() {
            share.y[i] = poly_eval(secret[i], &coeffs, share.x);
        }
    }

    Ok(shares)
}

/// reconstruct the secret from at least `threshold` distinct shares
///
/// exact duplicates are counted once. two shares at the same x with
/// different values, or extra shares that do not lie on the polynomial
/// defined by the first `threshold` shares, are `InconsistentShares`.
pub fn reconstruct(shares: &[Share], threshold: u8) -> Result<Zeroizing<[u8; SECRET_LEN]>> {
    if threshold == 0 {
        return Err(Error::InvalidParameters("threshold must be at least 1".into()));
    }

    let mut unique: Vec<&Share> = Vec::with_capacity(shares.len());
    for share in shares {
        if share.x == 0 {
            return Err(Error::InvalidParameters("share x-coordinate must be non-zero".into()));
        }
        match unique.iter().find(|seen| seen.x == share.x) {
            Some(seen) if bool::from(seen.y[..].ct_eq(&share.y[..])) => continue,
            Some(_) => return Err(Error::InconsistentShares),
            None => unique.push(share),
        }
    }

    let need = threshold as usize;
    if unique.len() < need {
        return Err(Error::InsufficientShares {
            have: unique.len(),
            need,
        });
    }

    let (basis, extra) = unique.split_at(need);
    let xs: Vec<u8> = basis.iter().map(|s| s.x).collect();
    let mut ys = Zeroizing::new(vec![0u8; need]);
    let mut secret = Zeroizing::new([0u8; SECRET_LEN]);

    for i in 0..SECRET_LEN {
        for (y, share) in ys.iter_mut().zip(basis) {
            *y = share.y[i];
        }
        secret[i] = interpolate(&xs, &ys, 0);

        for share in extra {
            if interpolate(&xs, &ys, share.x) != share.y[i] {
                return Err(Error::InconsistentShares);
            }
        }
    }

    Ok(secret)
}
