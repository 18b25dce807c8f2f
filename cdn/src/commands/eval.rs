use cdn_archive::{Act, Config, Headers};

use crate::error::{Error, Result};

/// Compile `rules` as one program and evaluate every root against the
/// configured variables, bound from `headers`.
pub fn evaluate(
    config: &Config,
    headers: &Headers,
    rules: &[String],
) -> std::result::Result<Vec<(String, String, u64)>, cdn_archive::ActError> {
    let mut act = Act::new(&config.act, headers);
    act.setup()?;

    let mut roots = vec![];
    act.compile(&rules.join("\n"), |root, text| {
        roots.push((root.to_string(), text.to_string()))
    })?;

    roots
        .into_iter()
        .map(|(root, text)| {
            let value = act.evaluate(&text)?;
            Ok((root, text, value))
        })
        .collect()
}

pub fn run(config: &Config, headers: &Headers, rules: &[String]) -> Result<()> {
    let results = evaluate(config, headers, rules).map_err(|source| Error::Evaluate { source })?;

    for (root, text, value) in results {
        println!("{} = {} => {}", root, text, value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_each_root() {
        let config = Config::default();
        let headers: Headers = vec![("X-CASPER-USER-ID", "2")].into_iter().collect();
        let rules = vec!["r = user_id = 2".to_string(), "w = 0x3 & 0x6".to_string()];

        let results = evaluate(&config, &headers, &rules).unwrap();
        assert_eq!(
            results,
            vec![
                ("r".to_string(), "RelationalEqual(user_id,2)".to_string(), 1),
                ("w".to_string(), "BitwiseAnd(0x3,0x6)".to_string(), 2),
            ]
        );
    }

    #[test]
    fn undeclared_variables_fail() {
        let config = Config::default();
        let headers = Headers::new();
        let rules = vec!["r = role = 1".to_string()];
        assert!(evaluate(&config, &headers, &rules).is_err());
    }
}
