//! Finds and applies the chain of JSON-Patch records that carries a locally
//! cached repodata document from its current hash (`have`) to the hash named
//! by a JLAP stream's footer (`want`).

use super::buffer::{JlapError, PatchRecord};

/// Walks `patches` in reverse looking for a chain from `want` back to `have`.
///
/// Whenever a patch's `to` equals the currently-desired hash, it is
/// prepended to the plan and the desired hash becomes that patch's `from`.
/// If multiple patches share a `to`, the first one encountered walking in
/// reverse wins — that is the most recently appended patch producing that
/// target, since patches only ever get appended to the end of the stream.
/// Patches whose `from` is never reached are simply never visited.
///
/// Fails with [`JlapError::PatchNotFound`] if the walk runs out of patches
/// before `desired` reaches `have`.
pub fn plan<'a>(
    patches: &'a [PatchRecord],
    have: &str,
    want: &str,
) -> Result<Vec<&'a PatchRecord>, JlapError> {
    if have == want {
        return Ok(Vec::new());
    }

    let mut desired = want.to_string();
    let mut plan = Vec::new();

    for patch in patches.iter().rev() {
        if patch.to != desired {
            continue;
        }
        plan.push(patch);
        desired = patch.from.clone();
        if desired == have {
            plan.reverse();
            return Ok(plan);
        }
    }

    Err(JlapError::PatchNotFound)
}

/// Applies `plan` in order to `doc`, mutating it in place.
pub fn apply(doc: &mut serde_json::Value, plan: &[&PatchRecord]) -> Result<(), JlapError> {
    for patch in plan {
        json_patch::patch(doc, &patch.patch)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use json_patch::Patch;

    fn record(from: &str, to: &str) -> PatchRecord {
        PatchRecord {
            from: from.to_string(),
            to: to.to_string(),
            patch: Patch(Vec::new()),
        }
    }

    #[test]
    fn finds_a_single_hop_chain() {
        let patches = vec![record("h0", "h1")];
        let plan = plan(&patches, "h0", "h1").unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn finds_a_multi_hop_chain_in_correct_order() {
        let patches = vec![record("h0", "h1"), record("h1", "h2"), record("h2", "h3")];
        let plan = plan(&patches, "h0", "h3").unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].from, "h0");
        assert_eq!(plan[1].from, "h1");
        assert_eq!(plan[2].from, "h2");
    }

    #[test]
    fn empty_plan_when_already_at_want() {
        let patches = vec![record("h0", "h1")];
        let plan = plan(&patches, "h1", "h1").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn fails_when_chain_does_not_reach_have() {
        let patches = vec![record("h1", "h2")];
        let err = plan(&patches, "h0", "h2").unwrap_err();
        assert!(matches!(err, JlapError::PatchNotFound));
    }

    #[test]
    fn tie_break_prefers_the_most_recently_appended_patch_for_a_target() {
        // Two different patches both claim to produce "h1"; the stream only
        // ever appends, so the later (rightmost) one is the live rewrite.
        let patches = vec![record("stale", "h1"), record("h0", "h1")];
        let plan = plan(&patches, "h0", "h1").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].from, "h0");
    }

    #[test]
    fn apply_runs_patches_in_plan_order() {
        let mut doc = serde_json::json!({"packages": {}});
        let add_a: Patch = serde_json::from_value(serde_json::json!([
            {"op": "add", "path": "/packages/a", "value": {"name": "a"}}
        ]))
        .unwrap();
        let add_b: Patch = serde_json::from_value(serde_json::json!([
            {"op": "add", "path": "/packages/b", "value": {"name": "b"}}
        ]))
        .unwrap();
        let patches = [
            PatchRecord {
                from: "h0".to_string(),
                to: "h1".to_string(),
                patch: add_a,
            },
            PatchRecord {
                from: "h1".to_string(),
                to: "h2".to_string(),
                patch: add_b,
            },
        ];
        let plan: Vec<&PatchRecord> = patches.iter().collect();
        apply(&mut doc, &plan).unwrap();
        assert_eq!(doc["packages"]["a"]["name"], "a");
        assert_eq!(doc["packages"]["b"]["name"], "b");
    }
}
