// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Builds an ordered, token-budgeted message payload from a plan's context
//! parts, pending files, and (optionally) RAG-retrieved chunks.

use std::collections::HashSet;

use tell_model::ContentPart;

use crate::plan::{ContextPart, ContextPartKind, Plan, Stage};
use crate::vectorstore::VectorStoreClient;

const RAG_HEADER: &str = "### Retrieved Contextual Information (RAG) ###";
const RAG_FOOTER: &str = "### End of Retrieved Contextual Information (RAG) ###";

/// The recognized assembly options from §4.3.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub include_maps: bool,
    pub smart_context_enabled: bool,
    pub include_apply_script: bool,
    pub base_only: bool,
    pub auto_only: bool,
    pub active_only: bool,
    pub activate_paths: HashSet<String>,
    pub activate_paths_ordered: Vec<String>,
    pub cache_control: bool,
    /// Stop appending parts once the running token sum exceeds this. `0`
    /// means unbounded.
    pub max_tokens: usize,
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub parts: Vec<ContentPart>,
    pub token_total: usize,
}

fn approx_tokens(s: &str) -> usize {
    (s.len() + 3) / 4
}

const APPLY_SCRIPT_PATH: &str = "_apply.sh";

fn passes_filters(part: &ContextPart, req: &AssemblyRequest, used_by_open_subtasks: &HashSet<&str>) -> bool {
    if req.base_only && part.auto_loaded {
        return false;
    }
    if req.auto_only && !part.auto_loaded {
        return false;
    }
    if req.smart_context_enabled && part.kind == ContextPartKind::File && !used_by_open_subtasks.is_empty() && !used_by_open_subtasks.contains(part.name.as_str()) {
        return false;
    }
    if req.active_only && !req.activate_paths.contains(&part.name) {
        return false;
    }
    true
}

fn render_block(part: &ContextPart, is_pending: bool, stage: Stage) -> Option<String> {
    let body = part.body.as_deref().unwrap_or("");
    match part.kind {
        ContextPartKind::File => {
            if is_pending && stage == Stage::PlanningContext {
                Some(format!("[pending changes] {}", part.name))
            } else {
                Some(format!("### File: {}\n{}", part.name, body))
            }
        }
        ContextPartKind::DirectoryTree => Some(format!("### Directory tree: {}\n{}", part.name, body)),
        ContextPartKind::Map => Some(format!("### Map: {}\n{}", part.name, body)),
        ContextPartKind::UrlContent => Some(format!("### URL: {}\n{}", part.name, body)),
        ContextPartKind::Image => None,
    }
}

pub struct ContextAssembler;

impl ContextAssembler {
    /// Run the full 10-step algorithm. `rag_query` and `query_embedding` are
    /// both required for RAG augmentation to fire; either absent skips step 1.
    pub async fn assemble(
        plan: &Plan,
        req: &AssemblyRequest,
        rag: &tell_config::RagSettings,
        vector_store: &dyn VectorStoreClient,
        rag_query_embedding: Option<&[f32]>,
    ) -> anyhow::Result<AssembledContext> {
        let mut text_blocks: Vec<String> = Vec::new();
        let mut image_parts: Vec<ContentPart> = Vec::new();
        let mut token_total = 0usize;

        // Step 1: RAG augmentation.
        if rag.enabled {
            if let Some(embedding) = rag_query_embedding {
                let chunks = vector_store.search_similar(embedding, rag.top_n, None).await?;
                if !chunks.is_empty() {
                    let mut block = String::from(RAG_HEADER);
                    block.push('\n');
                    for chunk in &chunks {
                        block.push_str(&chunk.text_chunk);
                        block.push('\n');
                    }
                    block.push_str(RAG_FOOTER);
                    token_total += approx_tokens(&block);
                    text_blocks.push(block);
                }
            }
        }

        if req.max_tokens > 0 && token_total > req.max_tokens {
            return Ok(Self::finish(text_blocks, image_parts, token_total, req));
        }

        // Step 2+3: candidate context parts, plus pending plan files folded in.
        let open_subtask_paths: HashSet<&str> = plan.subtasks.iter().filter(|s| !s.finished).flat_map(|s| s.uses.iter().map(|p| p.as_str())).collect();

        let mut candidates: Vec<(ContextPart, bool)> = plan
            .context_parts
            .iter()
            .filter(|p| req.include_maps || p.kind != ContextPartKind::Map)
            .filter(|p| passes_filters(p, req, &open_subtask_paths))
            .map(|p| (p.clone(), plan.files.files.contains_key(&p.name)))
            .collect();

        let existing_names: HashSet<&str> = plan.context_parts.iter().map(|p| p.name.as_str()).collect();
        for (path, body) in &plan.files.files {
            if existing_names.contains(path.as_str()) {
                continue;
            }
            if path == APPLY_SCRIPT_PATH && !req.include_apply_script {
                continue;
            }
            let synthetic = ContextPart { kind: ContextPartKind::File, name: path.clone(), token_estimate: approx_tokens(body), body: Some(body.clone()), auto_loaded: false, cache_control: false };
            if passes_filters(&synthetic, req, &open_subtask_paths) {
                candidates.push((synthetic, true));
            }
        }

        // Step 4: ordering by activate_paths_ordered, absentees last sorted by name.
        if !req.activate_paths_ordered.is_empty() {
            candidates.sort_by(|(a, _), (b, _)| {
                let rank = |name: &str| req.activate_paths_ordered.iter().position(|p| p == name);
                match (rank(&a.name), rank(&b.name)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.name.cmp(&b.name),
                }
            });
        }

        // Step 5+6: append parts, budgeting tokens, rendering per kind.
        for (part, is_pending) in &candidates {
            if req.max_tokens > 0 && token_total > req.max_tokens {
                break;
            }
            if part.kind == ContextPartKind::Image {
                if let Some(body) = &part.body {
                    image_parts.push(ContentPart::image(body.clone()));
                }
                continue;
            }
            if let Some(block) = render_block(part, *is_pending, req.stage) {
                token_total += approx_tokens(&block);
                text_blocks.push(block);
            }
        }

        // Step 7: removed-files block. Always appears, even once the token
        // budget has already been exceeded above — removal notices are cheap
        // and always relevant to the model's next action.
        if !plan.files.removed.is_empty() {
            let mut removed: Vec<&str> = plan.files.removed.iter().map(|s| s.as_str()).collect();
            removed.sort_unstable();
            let block = format!("### Removed files ###\n{}", removed.join("\n"));
            token_total += approx_tokens(&block);
            text_blocks.push(block);
        }

        Ok(Self::finish(text_blocks, image_parts, token_total, req))
    }

    fn finish(mut text_blocks: Vec<String>, image_parts: Vec<ContentPart>, token_total: usize, req: &AssemblyRequest) -> AssembledContext {
        // Step 10: terminal marker.
        text_blocks.push("### End of context ###".to_string());

        let mut parts: Vec<ContentPart> = text_blocks.into_iter().map(|t| ContentPart::text(t)).collect();
        // Step 8: images appended as separate parts.
        parts.extend(image_parts);

        // Step 9: mark the last text part with a cache-control tag.
        if req.cache_control {
            if let Some(last_text_idx) = parts.iter().rposition(|p| matches!(p, ContentPart::Text { .. })) {
                if let ContentPart::Text { text, .. } = parts.remove(last_text_idx) {
                    parts.insert(last_text_idx, ContentPart::text(text).with_cache_control());
                }
            }
        }

        AssembledContext { parts, token_total }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::{EmptyVectorStore, InMemoryVectorStore, RetrievedChunk};

    fn base_request(stage: Stage) -> AssemblyRequest {
        AssemblyRequest {
            include_maps: true,
            smart_context_enabled: false,
            include_apply_script: false,
            base_only: false,
            auto_only: false,
            active_only: false,
            activate_paths: HashSet::new(),
            activate_paths_ordered: Vec::new(),
            cache_control: false,
            max_tokens: 0,
            stage,
        }
    }

    fn file_part(name: &str, body: &str) -> ContextPart {
        ContextPart { kind: ContextPartKind::File, name: name.to_string(), token_estimate: approx_tokens(body), body: Some(body.to_string()), auto_loaded: false, cache_control: false }
    }

    #[tokio::test]
    async fn empty_plan_yields_only_terminal_marker() {
        let plan = Plan::new("p", "main");
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        assert_eq!(assembled.parts.len(), 1);
        match &assembled.parts[0] {
            ContentPart::Text { text, .. } => assert!(text.contains("End of context")),
            _ => panic!("expected text part"),
        }
    }

    #[tokio::test]
    async fn rag_augmentation_adds_delimited_block_in_order() {
        let mut plan = Plan::new("p", "main");
        let mut store = InMemoryVectorStore::new();
        store.insert(RetrievedChunk { document_id: "1".into(), file_path: "a.rs".into(), text_chunk: "chunk one".into() }, vec![1.0, 0.0]);
        store.insert(RetrievedChunk { document_id: "2".into(), file_path: "b.rs".into(), text_chunk: "chunk two".into() }, vec![0.9, 0.1]);
        plan.messages.clear();
        let req = base_request(Stage::Implementation);
        let rag = tell_config::RagSettings { enabled: true, top_n: 2, ..Default::default() };
        let assembled = ContextAssembler::assemble(&plan, &req, &rag, &store, Some(&[1.0, 0.0])).await.unwrap();
        let ContentPart::Text { text, .. } = &assembled.parts[0] else { panic!("expected text") };
        assert!(text.starts_with(RAG_HEADER));
        assert!(text.contains("chunk one"));
        assert!(text.contains("chunk two"));
        assert!(text.ends_with(RAG_FOOTER));
        let idx_one = text.find("chunk one").unwrap();
        let idx_two = text.find("chunk two").unwrap();
        assert!(idx_one < idx_two, "chunks must appear in retrieval order");
    }

    #[tokio::test]
    async fn rag_disabled_produces_no_rag_block() {
        let plan = Plan::new("p", "main");
        let mut store = InMemoryVectorStore::new();
        store.insert(RetrievedChunk { document_id: "1".into(), file_path: "a.rs".into(), text_chunk: "chunk".into() }, vec![1.0]);
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &store, Some(&[1.0])).await.unwrap();
        assert!(assembled.parts.iter().all(|p| !matches!(p, ContentPart::Text { text, .. } if text.contains(RAG_HEADER))));
    }

    #[tokio::test]
    async fn pending_file_in_planning_context_is_one_line_marker() {
        let mut plan = Plan::new("p", "main");
        plan.files.files.insert("src/lib.rs".into(), "fn main() {}".into());
        let req = base_request(Stage::PlanningContext);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined: String = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("[pending changes] src/lib.rs"));
        assert!(!joined.contains("fn main()"), "full body should not appear in the context phase");
    }

    #[tokio::test]
    async fn pending_file_in_implementation_gets_full_body() {
        let mut plan = Plan::new("p", "main");
        plan.files.files.insert("src/lib.rs".into(), "fn main() {}".into());
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined: String = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("fn main()"));
    }

    #[tokio::test]
    async fn activate_paths_ordered_controls_sequence() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(file_part("z.rs", "z"));
        plan.context_parts.push(file_part("a.rs", "a"));
        let mut req = base_request(Stage::Implementation);
        req.activate_paths_ordered = vec!["a.rs".into(), "z.rs".into()];
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let idx_a = assembled.parts.iter().position(|p| matches!(p, ContentPart::Text { text, .. } if text.contains("a.rs"))).unwrap();
        let idx_z = assembled.parts.iter().position(|p| matches!(p, ContentPart::Text { text, .. } if text.contains("z.rs"))).unwrap();
        assert!(idx_a < idx_z);
    }

    #[tokio::test]
    async fn absent_from_order_list_goes_last_sorted_by_name() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(file_part("b.rs", "b"));
        plan.context_parts.push(file_part("a.rs", "a"));
        plan.context_parts.push(file_part("ordered.rs", "o"));
        let mut req = base_request(Stage::Implementation);
        req.activate_paths_ordered = vec!["ordered.rs".into()];
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let idx_ordered = assembled.parts.iter().position(|p| matches!(p, ContentPart::Text { text, .. } if text.contains("ordered.rs"))).unwrap();
        let idx_a = assembled.parts.iter().position(|p| matches!(p, ContentPart::Text { text, .. } if text.contains("a.rs"))).unwrap();
        let idx_b = assembled.parts.iter().position(|p| matches!(p, ContentPart::Text { text, .. } if text.contains("b.rs"))).unwrap();
        assert!(idx_ordered < idx_a);
        assert!(idx_a < idx_b, "a.rs and b.rs are both absent from the order list, so fall back to name order");
    }

    #[tokio::test]
    async fn active_only_restricts_to_activate_paths() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(file_part("keep.rs", "k"));
        plan.context_parts.push(file_part("drop.rs", "d"));
        let mut req = base_request(Stage::Implementation);
        req.active_only = true;
        req.activate_paths = HashSet::from(["keep.rs".to_string()]);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined: String = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("keep.rs"));
        assert!(!joined.contains("drop.rs"));
    }

    #[tokio::test]
    async fn smart_context_restricts_to_open_subtask_uses() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(file_part("used.rs", "u"));
        plan.context_parts.push(file_part("unused.rs", "x"));
        plan.subtasks.push(crate::plan::Subtask { title: "t".into(), uses: vec!["used.rs".into()], finished: false });
        let mut req = base_request(Stage::Implementation);
        req.smart_context_enabled = true;
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined: String = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("used.rs"));
        assert!(!joined.contains("unused.rs"));
    }

    #[tokio::test]
    async fn apply_script_excluded_unless_requested() {
        let mut plan = Plan::new("p", "main");
        plan.files.files.insert(APPLY_SCRIPT_PATH.into(), "echo hi".into());
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined: String = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(!joined.contains("echo hi"));

        let mut req2 = base_request(Stage::Implementation);
        req2.include_apply_script = true;
        let assembled2 = ContextAssembler::assemble(&plan, &req2, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let joined2: String = assembled2.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect::<Vec<_>>().join("\n");
        assert!(joined2.contains("echo hi"));
    }

    #[tokio::test]
    async fn cache_control_marks_only_last_text_part() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(file_part("a.rs", "a"));
        let mut req = base_request(Stage::Implementation);
        req.cache_control = true;
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let marked: Vec<bool> = assembled.parts.iter().map(|p| matches!(p, ContentPart::Text { cache_control, .. } if *cache_control)).collect();
        assert_eq!(marked.iter().filter(|b| **b).count(), 1);
        assert!(*marked.last().unwrap());
    }

    #[tokio::test]
    async fn max_tokens_stops_appending_parts() {
        let mut plan = Plan::new("p", "main");
        for i in 0..20 {
            plan.context_parts.push(file_part(&format!("f{i}.rs"), &"x".repeat(100)));
        }
        let mut req = base_request(Stage::Implementation);
        req.max_tokens = 50;
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        assert!(assembled.parts.len() < 21, "budget should cut off well before all 20 files plus terminal marker");
    }

    #[tokio::test]
    async fn image_parts_become_separate_content_parts() {
        let mut plan = Plan::new("p", "main");
        plan.context_parts.push(ContextPart { kind: ContextPartKind::Image, name: "diagram.png".into(), token_estimate: 0, body: Some("data:image/png;base64,AAAA".into()), auto_loaded: false, cache_control: false });
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        assert!(assembled.parts.iter().any(|p| matches!(p, ContentPart::Image { .. })));
    }

    #[tokio::test]
    async fn removed_files_render_as_a_sorted_block_before_the_terminal_marker() {
        let mut plan = Plan::new("p", "main");
        plan.files.removed.insert("src/old.rs".into());
        plan.files.removed.insert("src/older.rs".into());
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        let texts: Vec<&str> = assembled.parts.iter().filter_map(|p| if let ContentPart::Text { text, .. } = p { Some(text.as_str()) } else { None }).collect();
        let removed_idx = texts.iter().position(|t| t.starts_with("### Removed files ###")).expect("removed-files block present");
        let terminal_idx = texts.iter().position(|t| t.contains("End of context")).unwrap();
        assert!(removed_idx < terminal_idx);
        let block = texts[removed_idx];
        assert!(block.find("src/old.rs").unwrap() < block.find("src/older.rs").unwrap());
    }

    #[tokio::test]
    async fn no_removed_files_means_no_removed_block() {
        let plan = Plan::new("p", "main");
        let req = base_request(Stage::Implementation);
        let assembled = ContextAssembler::assemble(&plan, &req, &tell_config::RagSettings::default(), &EmptyVectorStore, None).await.unwrap();
        assert!(assembled.parts.iter().all(|p| !matches!(p, ContentPart::Text { text, .. } if text.contains("Removed files"))));
    }
}
