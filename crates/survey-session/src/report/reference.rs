use std::collections::BTreeMap;

use rand::Rng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::scoring::ResultTable;

/// Letters without I, O, E and Z.
pub const CODE_LETTERS: &str = "ABCDFGHJKLMNPQRSTUVWXY";
/// Digits without 0 and 1.
pub const CODE_DIGITS: &str = "23456789";

const HASH_LEN: usize = 12;

/// Human-friendly reference like `K7P-3XA`. Each half holds at least one
/// letter and one digit.
pub fn reference_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}-{}", code_part(rng), code_part(rng))
}

fn code_part<R: Rng + ?Sized>(rng: &mut R) -> String {
    let alphabet: Vec<char> = CODE_LETTERS.chars().chain(CODE_DIGITS.chars()).collect();
    loop {
        let part: String = (0..3)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        let has_letter = part.chars().any(|c| CODE_LETTERS.contains(c));
        let has_digit = part.chars().any(|c| CODE_DIGITS.contains(c));
        if has_letter && has_digit {
            return part;
        }
    }
}

/// First 12 hex characters of the SHA-256 of the answers as canonical
/// (key-sorted, compact) JSON.
pub fn answers_hash(answers: &Map<String, Value>) -> String {
    let canonical = canonical(&Value::Object(answers.clone()));
    short_hash(canonical.to_string().as_bytes())
}

/// Client metadata hashed one key at a time, salted with the reference code.
pub fn client_hashes(
    reference_code: &str,
    client_info: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    client_info
        .iter()
        .map(|(key, value)| {
            let salted = format!("{reference_code}:{value}");
            (format!("{key}_hash"), short_hash(salted.as_bytes()))
        })
        .collect()
}

/// Results table as `<row label>_<column header>` keys, one per data cell.
pub fn flatten_results(table: &ResultTable) -> BTreeMap<String, String> {
    let header = table.header();
    let mut flat = BTreeMap::new();
    for row in table.data_rows() {
        let Some(label) = row.first() else {
            continue;
        };
        let label = sanitize_key(label);
        for (column, cell) in header.iter().zip(row).skip(1) {
            flat.insert(format!("{label}_{}", sanitize_key(column)), cell.clone());
        }
    }
    flat
}

/// Replaces `/` and spaces with `_` and strips common French accents.
pub fn sanitize_key(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '/' | ' ' => '_',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' | 'ä' => 'a',
            'ô' | 'ö' => 'o',
            'î' | 'ï' => 'i',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn short_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_LEN);
    digest
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    #[test]
    fn reference_codes_use_the_unambiguous_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let code = reference_code(&mut rng);
            assert_eq!(code.len(), 7);
            let (left, right) = code.split_once('-').expect("dash");
            for part in [left, right] {
                assert_eq!(part.len(), 3);
                assert!(part.chars().any(|c| CODE_LETTERS.contains(c)));
                assert!(part.chars().any(|c| CODE_DIGITS.contains(c)));
                assert!(!part.contains(['0', '1', 'O', 'I', 'E', 'Z']));
            }
        }
    }

    #[test]
    fn answers_hash_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": true, "x": null } });
        let b = json!({ "a": { "x": null, "y": true }, "b": 1 });
        let hash = answers_hash(a.as_object().expect("object"));
        assert_eq!(hash.len(), 12);
        assert_eq!(hash, answers_hash(b.as_object().expect("object")));
        assert_ne!(hash, answers_hash(json!({ "b": 2 }).as_object().expect("object")));
    }

    #[test]
    fn client_hashes_are_salted_per_reference() {
        let info = BTreeMap::from([
            ("user_agent".to_string(), "Firefox".to_string()),
            ("ip".to_string(), "10.0.0.1".to_string()),
        ]);
        let first = client_hashes("AB2-3CD", &info);
        let second = client_hashes("XY4-5ZW", &info);
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            vec!["ip_hash", "user_agent_hash"]
        );
        assert_ne!(first["ip_hash"], second["ip_hash"]);
        assert_eq!(first["ip_hash"], client_hashes("AB2-3CD", &info)["ip_hash"]);
    }

    #[test]
    fn results_are_flattened_with_sanitized_keys() {
        let table = ResultTable::new(vec![
            vec!["Gène".into(), "Risque à 5 ans".into(), "Total/vie".into()],
            vec!["MLH1".into(), "1.2".into(), "8".into()],
            vec!["PMS2 ou MSH6".into(), "0.4".into(), "3".into()],
        ])
        .expect("table");

        let flat = flatten_results(&table);
        assert_eq!(flat.len(), 4);
        assert_eq!(flat["MLH1_Risque_a_5_ans"], "1.2");
        assert_eq!(flat["MLH1_Total_vie"], "8");
        assert_eq!(flat["PMS2_ou_MSH6_Risque_a_5_ans"], "0.4");
    }
}
