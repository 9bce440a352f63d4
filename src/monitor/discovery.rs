/// Signature diffing and mint-creation detection

use crate::rpc::ParsedTransaction;

/// Parsed instruction types that create a mint
pub const INITIALIZE_MINT_KINDS: [&str; 2] = ["initializeMint", "initializeMint2"];

/// Signatures newer than `watermark`, oldest first.
///
/// `newest_first` is the RPC's signature list. When the watermark has aged
/// out of the list every entry is treated as new.
pub fn new_signatures_since(watermark: &str, newest_first: &[String]) -> Vec<String> {
    let end = newest_first
        .iter()
        .position(|signature| signature == watermark)
        .unwrap_or(newest_first.len());
    newest_first[..end].iter().rev().cloned().collect()
}

/// Mint address initialized by `tx` through `token_program`, if any.
pub fn find_new_mint(tx: &ParsedTransaction, token_program: &str) -> Option<String> {
    tx.instructions
        .iter()
        .filter(|ix| ix.program_id == token_program)
        .filter(|ix| {
            ix.kind
                .as_deref()
                .map_or(false, |kind| INITIALIZE_MINT_KINDS.contains(&kind))
        })
        .find_map(|ix| ix.info.get("mint").and_then(|mint| mint.as_str()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ParsedInstruction;
    use serde_json::json;

    const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    fn sigs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn tx(instructions: Vec<ParsedInstruction>) -> ParsedTransaction {
        ParsedTransaction {
            signature: "sig".to_string(),
            slot: 1,
            has_meta: true,
            instructions,
        }
    }

    fn ix(program: &str, kind: Option<&str>, info: serde_json::Value) -> ParsedInstruction {
        ParsedInstruction {
            program_id: program.to_string(),
            kind: kind.map(str::to_string),
            info,
        }
    }

    #[test]
    fn test_new_signatures_oldest_first() {
        let list = sigs(&["s5", "s4", "s3", "s2"]);
        assert_eq!(new_signatures_since("s3", &list), sigs(&["s4", "s5"]));
        assert!(new_signatures_since("s5", &list).is_empty());
    }

    #[test]
    fn test_unknown_watermark_takes_whole_list() {
        let list = sigs(&["s9", "s8"]);
        assert_eq!(new_signatures_since("s1", &list), sigs(&["s8", "s9"]));
    }

    #[test]
    fn test_finds_both_mint_initializers() {
        for kind in INITIALIZE_MINT_KINDS {
            let found = find_new_mint(
                &tx(vec![
                    ix("ComputeBudget111111111111111111111111111111", None, json!(null)),
                    ix(TOKEN_PROGRAM, Some(kind), json!({"mint": "NewMint111", "decimals": 9})),
                ]),
                TOKEN_PROGRAM,
            );
            assert_eq!(found.as_deref(), Some("NewMint111"));
        }
    }

    #[test]
    fn test_ignores_other_programs_and_kinds() {
        let transfer = tx(vec![ix(TOKEN_PROGRAM, Some("transfer"), json!({"mint": "X"}))]);
        assert_eq!(find_new_mint(&transfer, TOKEN_PROGRAM), None);

        let impostor = tx(vec![ix("Fake111", Some("initializeMint"), json!({"mint": "X"}))]);
        assert_eq!(find_new_mint(&impostor, TOKEN_PROGRAM), None);

        let no_mint = tx(vec![ix(TOKEN_PROGRAM, Some("initializeMint"), json!({}))]);
        assert_eq!(find_new_mint(&no_mint, TOKEN_PROGRAM), None);
    }
}
