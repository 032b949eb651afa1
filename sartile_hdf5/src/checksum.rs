//! The two checksums the HDF5 format uses.
//!
//! Jenkins lookup3 guards metadata blocks (v2/v3 superblocks, v2 object
//! headers); Fletcher-32 guards filtered chunk payloads. Both are
//! verify-only on this read path.

/// Jenkins lookup3 "hashlittle" over a byte stream.
///
/// This is the `H5_checksum_lookup3` algorithm: 12-byte blocks mixed as
/// three little-endian words, with a tail switch and a final mix.
pub fn jenkins_lookup3(data: &[u8], init: u32) -> u32 {
	fn rot(x: u32, k: u32) -> u32 {
		x.rotate_left(k)
	}

	let mut a = 0xdead_beef_u32.wrapping_add(data.len() as u32).wrapping_add(init);
	let mut b = a;
	let mut c = a;

	let mut chunks = data.chunks_exact(12);
	for block in chunks.by_ref() {
		a = a.wrapping_add(u32::from_le_bytes(block[0..4].try_into().unwrap()));
		b = b.wrapping_add(u32::from_le_bytes(block[4..8].try_into().unwrap()));
		c = c.wrapping_add(u32::from_le_bytes(block[8..12].try_into().unwrap()));

		a = a.wrapping_sub(c);
		a ^= rot(c, 4);
		c = c.wrapping_add(b);
		b = b.wrapping_sub(a);
		b ^= rot(a, 6);
		a = a.wrapping_add(c);
		c = c.wrapping_sub(b);
		c ^= rot(b, 8);
		b = b.wrapping_add(a);
		a = a.wrapping_sub(c);
		a ^= rot(c, 16);
		c = c.wrapping_add(b);
		b = b.wrapping_sub(a);
		b ^= rot(a, 19);
		a = a.wrapping_add(c);
		c = c.wrapping_sub(b);
		c ^= rot(b, 4);
		b = b.wrapping_add(a);
	}

	let tail = chunks.remainder();
	if tail.is_empty() {
		return c;
	}
	let mut word = [0u8; 12];
	word[..tail.len()].copy_from_slice(tail);
	a = a.wrapping_add(u32::from_le_bytes(word[0..4].try_into().unwrap()));
	b = b.wrapping_add(u32::from_le_bytes(word[4..8].try_into().unwrap()));
	c = c.wrapping_add(u32::from_le_bytes(word[8..12].try_into().unwrap()));

	c ^= b;
	c = c.wrapping_sub(rot(b, 14));
	a ^= c;
	a = a.wrapping_sub(rot(c, 11));
	b ^= a;
	b = b.wrapping_sub(rot(a, 25));
	c ^= b;
	c = c.wrapping_sub(rot(b, 16));
	a ^= c;
	a = a.wrapping_sub(rot(c, 4));
	b ^= a;
	b = b.wrapping_sub(rot(a, 14));
	c ^= b;
	c = c.wrapping_sub(rot(b, 24));

	c
}

/// Fletcher-32 over big-endian 16-bit words, the `H5_checksum_fletcher32`
/// flavor: an odd trailing byte becomes the high byte of a final word.
pub fn fletcher32(data: &[u8]) -> u32 {
	let mut sum1: u64 = 0;
	let mut sum2: u64 = 0;

	let mut words = data.chunks_exact(2);
	for pair in words.by_ref() {
		sum1 += u64::from(pair[0]) << 8 | u64::from(pair[1]);
		sum2 += sum1;
		// Chunk payloads stay far below the ~2^23 words where these
		// accumulators could overflow, but reduce defensively anyway.
		if sum2 >= u64::MAX / 2 {
			sum1 %= 65535;
			sum2 %= 65535;
		}
	}
	if let [last] = words.remainder() {
		sum1 += u64::from(*last) << 8;
		sum2 += sum1;
	}

	((sum2 % 65535) << 16) as u32 | (sum1 % 65535) as u32
}
