//! Secret strength assessment for TalonVault.
//!
//! Scores a candidate secret for length, character-class diversity,
//! Shannon entropy, and weak patterns. Pure functions, no I/O. The vault
//! treats the result as advisory; rotation tooling applies the policy and
//! decides whether to reject.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Substrings that mark a secret as guessable regardless of its other
/// characteristics.
const WEAK_TOKENS: [&str; 10] = [
    "password", "passwd", "secret", "qwerty", "letmein", "admin", "welcome", "123456", "changeme",
    "default",
];

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Configurable minimums for accepting a candidate secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthPolicy {
    pub min_length: usize,
    /// Character classes required (lower, upper, digit, symbol — max 4).
    pub min_classes: usize,
    pub min_score: u8,
}

impl Default for StrengthPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            min_classes: 3,
            min_score: 60,
        }
    }
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthVerdict {
    Weak,
    Fair,
    Strong,
}

impl std::fmt::Display for StrengthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Weak => "weak",
            Self::Fair => "fair",
            Self::Strong => "strong",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a strength assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthReport {
    /// 0-100, deduction-scored.
    pub score: u8,
    /// Shannon entropy in bits per character.
    pub entropy_bits: f64,
    pub length: usize,
    /// Character classes present (max 4).
    pub classes: usize,
    /// Human-readable reasons for each deduction.
    pub findings: Vec<String>,
    pub verdict: StrengthVerdict,
}

impl StrengthReport {
    /// True when the secret meets every minimum in `policy`.
    pub fn satisfies(&self, policy: &StrengthPolicy) -> bool {
        self.length >= policy.min_length
            && self.classes >= policy.min_classes
            && self.score >= policy.min_score
    }
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// Shannon entropy of the secret in bits per character, over byte frequency.
pub fn shannon_entropy(secret: &str) -> f64 {
    if secret.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in secret.bytes() {
        counts[b as usize] += 1;
    }
    let len = secret.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Count of character classes present: lowercase, uppercase, digit, symbol.
pub fn character_classes(secret: &str) -> usize {
    let mut lower = false;
    let mut upper = false;
    let mut digit = false;
    let mut symbol = false;
    for c in secret.chars() {
        if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            symbol = true;
        }
    }
    usize::from(lower) + usize::from(upper) + usize::from(digit) + usize::from(symbol)
}

/// Score a candidate secret.
///
/// Starts at 100 and deducts:
/// - length: < 8 chars -60, < 12 -25, < 16 -10
/// - character classes: one -40, two -25, three -10
/// - entropy: < 2.0 bits/char -20, < 3.0 -10
/// - known weak token present: -30
/// - run of 4+ identical characters: -15
/// - ascending/descending run of 4+ (abcd, 4321): -15
pub fn assess(secret: &str) -> StrengthReport {
    if secret.is_empty() {
        return StrengthReport {
            score: 0,
            entropy_bits: 0.0,
            length: 0,
            classes: 0,
            findings: vec!["empty secret".to_string()],
            verdict: StrengthVerdict::Weak,
        };
    }

    let mut score: i32 = 100;
    let mut findings = Vec::new();

    let length = secret.chars().count();
    if length < 8 {
        // Too short to guard anything no matter how varied: the deduction
        // alone keeps the verdict below Fair.
        score -= 60;
        findings.push(format!("length {length} is below 8 characters"));
    } else if length < 12 {
        score -= 25;
        findings.push(format!("length {length} is below 12 characters"));
    } else if length < 16 {
        score -= 10;
        findings.push(format!("length {length} is below 16 characters"));
    }

    let classes = character_classes(secret);
    match classes {
        1 => {
            score -= 40;
            findings.push("single character class".to_string());
        }
        2 => {
            score -= 25;
            findings.push("only two character classes".to_string());
        }
        3 => {
            score -= 10;
            findings.push("only three character classes".to_string());
        }
        _ => {}
    }

    let entropy_bits = shannon_entropy(secret);
    if entropy_bits < 2.0 {
        score -= 20;
        findings.push(format!("entropy {entropy_bits:.2} bits/char is very low"));
    } else if entropy_bits < 3.0 {
        score -= 10;
        findings.push(format!("entropy {entropy_bits:.2} bits/char is low"));
    }

    let lowered = secret.to_lowercase();
    if let Some(token) = WEAK_TOKENS.iter().find(|t| lowered.contains(*t)) {
        score -= 30;
        findings.push(format!("contains weak token '{token}'"));
    }

    if has_repeated_run(secret, 4) {
        score -= 15;
        findings.push("run of 4+ identical characters".to_string());
    }

    if has_sequential_run(secret, 4) {
        score -= 15;
        findings.push("sequential character run (e.g. abcd, 4321)".to_string());
    }

    let score = score.clamp(0, 100) as u8;
    let verdict = if score >= 80 {
        StrengthVerdict::Strong
    } else if score >= 50 {
        StrengthVerdict::Fair
    } else {
        StrengthVerdict::Weak
    };

    StrengthReport {
        score,
        entropy_bits,
        length,
        classes,
        findings,
        verdict,
    }
}

fn has_repeated_run(secret: &str, run: usize) -> bool {
    let chars: Vec<char> = secret.chars().collect();
    chars.windows(run).any(|w| w.iter().all(|&c| c == w[0]))
}

fn has_sequential_run(secret: &str, run: usize) -> bool {
    let codes: Vec<i64> = secret.chars().map(|c| c as i64).collect();
    codes.windows(run).any(|w| {
        w.windows(2).all(|p| p[1] == p[0] + 1) || w.windows(2).all(|p| p[1] == p[0] - 1)
    })
}
