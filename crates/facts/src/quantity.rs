//! Kubernetes resource quantity parsing.
//!
//! Only the subset needed to compare node capacity is supported: decimal
//! numbers with an optional SI, binary or exponent suffix.

/// Split a quantity into its numeric part and scale factor.
fn parse_scaled(input: &str, suffix_scale: fn(&str) -> Option<f64>) -> Option<f64> {
	let input = input.trim();
	if input.is_empty() {
		return None;
	}

	let split = input
		.char_indices()
		.find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '+' || *c == '-'))
		.map_or(input.len(), |(i, _)| i);
	let (number, suffix) = input.split_at(split);

	let value: f64 = number.parse().ok()?;
	if !value.is_finite() || value < 0.0 {
		return None;
	}

	// `E` and `Ei` are scale suffixes; `e3` or `E3` is an exponent.
	let scale = match suffix_scale(suffix) {
		Some(scale) => scale,
		None => {
			let exp = suffix.strip_prefix(['e', 'E'])?;
			10f64.powi(exp.parse::<i32>().ok()?)
		}
	};

	Some(value * scale)
}

fn memory_scale(suffix: &str) -> Option<f64> {
	const KI: f64 = 1024.0;
	Some(match suffix {
		"" => 1.0,
		"m" => 1e-3,
		"k" => 1e3,
		"M" => 1e6,
		"G" => 1e9,
		"T" => 1e12,
		"P" => 1e15,
		"E" => 1e18,
		"Ki" => KI,
		"Mi" => KI.powi(2),
		"Gi" => KI.powi(3),
		"Ti" => KI.powi(4),
		"Pi" => KI.powi(5),
		"Ei" => KI.powi(6),
		_ => return None,
	})
}

fn cpu_scale(suffix: &str) -> Option<f64> {
	Some(match suffix {
		"" => 1.0,
		"n" => 1e-9,
		"u" => 1e-6,
		"m" => 1e-3,
		"k" => 1e3,
		_ => return None,
	})
}

/// Parse a CPU quantity into millicores (`"1500m"` → 1500, `"2"` → 2000).
pub fn parse_cpu_millis(input: &str) -> Option<u64> {
	let cores = parse_scaled(input, cpu_scale)?;
	Some((cores * 1000.0).round() as u64)
}

/// Parse a memory quantity into bytes (`"8Gi"` → 8589934592).
pub fn parse_memory_bytes(input: &str) -> Option<u64> {
	let bytes = parse_scaled(input, memory_scale)?;
	Some(bytes.round() as u64)
}
