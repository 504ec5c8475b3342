//! Node Module Tests
//!
//! ## Test Scopes
//! - **Agent**: block and file writes, conflicts, deletes, exact-length reads.
//! - **Startup**: catalog rebuild from disk versus clearing the data root.
//! - **Registration**: the payload a node sends to the balancer.

#[cfg(test)]
mod tests {
    use crate::balancer::types::REGISTRATION_SENTINEL;
    use crate::blocks::{Block, PartialFile};
    use crate::config::NodeConfig;
    use crate::node::NodeAgent;
    use crate::node::layout::{FILE_META_NAME, block_file_name, parse_block_index};
    use crate::node::registration::registration_request;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path, clear_on_start: bool) -> NodeConfig {
        NodeConfig {
            root_path: root.to_path_buf(),
            node_name: "node-a".to_string(),
            clear_on_start,
            ..NodeConfig::default()
        }
    }

    async fn open_agent(root: &Path) -> NodeAgent {
        NodeAgent::open(&config(root, true)).await.unwrap()
    }

    fn partial(name: &str, total: u32, blocks: &[(u32, &[u8])]) -> PartialFile {
        PartialFile {
            file_name: name.to_string(),
            total_block_count: total,
            file_size: None,
            blocks: blocks
                .iter()
                .map(|(index, data)| Block::new(name, *index, total, data.to_vec()))
                .collect(),
        }
    }

    // ============================================================
    // WRITE & READ TESTS
    // ============================================================

    #[tokio::test]
    async fn test_write_then_read_block() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let state = agent
            .write_block(&Block::new("notes.txt", 0, 1, b"abcd".to_vec()))
            .await;
        assert!(state.is_success());
        assert!(state.messages().is_empty());

        let block = agent.read_block("notes.txt", 0).await.unwrap().unwrap();
        assert_eq!(block.data, b"abcd");
        assert_eq!(block.info.total_block_count, 1);
        assert!(agent.catalog().contains_block("notes.txt", 0));
    }

    #[tokio::test]
    async fn test_rewriting_block_reports_overwrite() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        agent
            .write_block(&Block::new("notes.txt", 0, 1, b"old!".to_vec()))
            .await;
        let state = agent
            .write_block(&Block::new("notes.txt", 0, 1, b"new!".to_vec()))
            .await;

        assert!(state.is_success());
        assert_eq!(state.messages().len(), 1);
        assert!(state.messages()[0].contains("overwritten"));

        let block = agent.read_block("notes.txt", 0).await.unwrap().unwrap();
        assert_eq!(block.data, b"new!");
    }

    #[tokio::test]
    async fn test_short_final_block_read_exactly() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let file = partial("greeting.txt", 3, &[(0, b"hell"), (1, b"o wo"), (2, b"rld")]);
        assert!(agent.add_or_replace_file(file, false).await.is_success());

        let last = agent.read_block("greeting.txt", 2).await.unwrap().unwrap();
        assert_eq!(last.data, b"rld");
        assert_eq!(last.data.len(), 3);
    }

    #[tokio::test]
    async fn test_read_unknown_block_is_none() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        assert!(agent.read_block("missing.bin", 0).await.unwrap().is_none());

        agent
            .write_block(&Block::new("present.bin", 0, 2, b"x".to_vec()))
            .await;
        assert!(agent.read_block("present.bin", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_file_name_is_rejected_before_disk() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let state = agent
            .write_block(&Block::new("../escape", 0, 1, b"x".to_vec()))
            .await;

        assert!(!state.is_success());
        assert!(!dir.path().join("escape").exists());
        assert!(agent.read_block("../escape", 0).await.is_err());
    }

    // ============================================================
    // FILE CONFLICT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_existing_file_without_force_is_untouched() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        // ARRANGE
        let original = partial("report.pdf", 2, &[(0, b"v1-a"), (1, b"v1-b")]);
        assert!(agent.add_or_replace_file(original, false).await.is_success());

        // ACT
        let replacement = partial("report.pdf", 1, &[(0, b"v2")]);
        let state = agent.add_or_replace_file(replacement, false).await;

        // ASSERT
        assert!(!state.is_success());
        assert!(state.messages()[0].contains("already exists"));
        let block = agent.read_block("report.pdf", 1).await.unwrap().unwrap();
        assert_eq!(block.data, b"v1-b");
        assert_eq!(agent.catalog().get("report.pdf").unwrap().blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_forced_replace_drops_old_blocks() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let original = partial("report.pdf", 2, &[(0, b"v1-a"), (1, b"v1-b")]);
        agent.add_or_replace_file(original, false).await;

        let replacement = partial("report.pdf", 1, &[(0, b"v2")]);
        let state = agent.add_or_replace_file(replacement, true).await;

        assert!(state.is_success());
        assert!(state.messages().iter().any(|m| m.contains("replaced")));
        assert!(agent.read_block("report.pdf", 1).await.unwrap().is_none());
        assert!(!agent.layout().block_path("report.pdf", 1).exists());
        let block = agent.read_block("report.pdf", 0).await.unwrap().unwrap();
        assert_eq!(block.data, b"v2");
    }

    #[tokio::test]
    async fn test_stray_block_in_partial_file_fails() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let mut file = partial("a.bin", 2, &[(0, b"aa")]);
        file.blocks.push(Block::new("b.bin", 1, 2, b"bb".to_vec()));

        let state = agent.add_or_replace_file(file, false).await;

        assert!(!state.is_success());
        assert!(!agent.catalog().contains_file("a.bin"));
    }

    // ============================================================
    // ADD OR REPLACE BLOCK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_add_block_to_unknown_file_creates_it() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let state = agent
            .add_or_replace_block(Block::new("fresh.bin", 2, 3, b"zz".to_vec()), false)
            .await;

        assert!(state.is_success());
        let entry = agent.catalog().get("fresh.bin").unwrap();
        assert_eq!(entry.indexes(), vec![2]);
        assert_eq!(entry.total_block_count, 3);
    }

    #[tokio::test]
    async fn test_add_existing_block_requires_allow_overwrite() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        agent
            .add_or_replace_file(partial("data.bin", 1, &[(0, b"one")]), false)
            .await;

        let refused = agent
            .add_or_replace_block(Block::new("data.bin", 0, 1, b"two".to_vec()), false)
            .await;
        assert!(!refused.is_success());
        assert!(refused.messages()[0].contains("Conflict"));

        let accepted = agent
            .add_or_replace_block(Block::new("data.bin", 0, 1, b"two".to_vec()), true)
            .await;
        assert!(accepted.is_success());
        assert!(accepted.messages()[0].contains("overwritten"));

        let block = agent.read_block("data.bin", 0).await.unwrap().unwrap();
        assert_eq!(block.data, b"two");
    }

    #[tokio::test]
    async fn test_add_new_index_to_known_file() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        agent
            .add_or_replace_file(partial("data.bin", 2, &[(0, b"one")]), false)
            .await;
        let state = agent
            .add_or_replace_block(Block::new("data.bin", 1, 2, b"two".to_vec()), false)
            .await;

        assert!(state.is_success());
        assert_eq!(agent.catalog().get("data.bin").unwrap().indexes(), vec![0, 1]);
    }

    // ============================================================
    // DELETE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_removes_catalog_entry_and_directory() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        agent
            .add_or_replace_file(partial("gone.txt", 1, &[(0, b"bye")]), false)
            .await;
        let file_dir = agent.layout().file_dir("gone.txt");
        assert!(file_dir.exists());

        let state = agent.delete_file("gone.txt").await;

        assert!(state.is_success());
        assert!(state.messages().is_empty());
        assert!(!file_dir.exists());
        assert!(!agent.catalog().contains_file("gone.txt"));
    }

    #[tokio::test]
    async fn test_delete_unknown_file_warns_but_succeeds() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let state = agent.delete_file("never-stored.txt").await;

        assert!(state.is_success());
        assert_eq!(state.messages().len(), 1);
        assert!(state.messages()[0].contains("not registered"));
    }

    #[tokio::test]
    async fn test_failed_cleanup_is_reported_not_panicked() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        agent
            .add_or_replace_file(partial("tmp.bin", 1, &[(0, b"x")]), false)
            .await;
        assert!(agent.discard_file_dir("tmp.bin").await);
        assert!(!agent.layout().file_dir("tmp.bin").exists());

        // A plain file where the directory should be cannot be removed as one.
        let blocker = agent.layout().file_dir("blocked.bin");
        std::fs::write(&blocker, b"not a dir").unwrap();

        assert!(!agent.discard_file_dir("blocked.bin").await);
        assert!(blocker.exists());
    }

    // ============================================================
    // CONCURRENCY TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_block_writes_and_delete_leave_disk_and_catalog_in_step() {
        let dir = TempDir::new().unwrap();
        let agent = std::sync::Arc::new(open_agent(dir.path()).await);
        agent
            .add_or_replace_file(partial("busy.bin", 8, &[(0, b"seed")]), false)
            .await;

        let mut tasks = tokio::task::JoinSet::new();
        for index in 0..8u32 {
            let agent = agent.clone();
            tasks.spawn(async move {
                let block = Block::new("busy.bin", index, 8, vec![index as u8; 16]);
                agent.add_or_replace_block(block, true).await
            });
        }
        let deleter = agent.clone();
        tasks.spawn(async move { deleter.delete_file("busy.bin").await });

        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().is_success());
        }

        // Whatever won the races, the catalog lists exactly the blocks on disk.
        let file_dir = agent.layout().file_dir("busy.bin");
        let on_disk: Vec<u32> = match std::fs::read_dir(&file_dir) {
            Ok(entries) => {
                let mut indexes: Vec<u32> = entries
                    .filter_map(|entry| {
                        parse_block_index(entry.unwrap().file_name().to_str()?)
                    })
                    .collect();
                indexes.sort();
                indexes
            }
            Err(_) => Vec::new(),
        };
        let listed = agent
            .catalog()
            .get("busy.bin")
            .map(|entry| entry.indexes())
            .unwrap_or_default();
        assert_eq!(listed, on_disk);

        for index in listed {
            let block = agent.read_block("busy.bin", index).await.unwrap().unwrap();
            assert_eq!(block.data.len(), 16);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_of_one_file_let_exactly_one_win() {
        let dir = TempDir::new().unwrap();
        let agent = std::sync::Arc::new(open_agent(dir.path()).await);

        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..4u8 {
            let agent = agent.clone();
            tasks.spawn(async move {
                let file = partial("race.bin", 2, &[(0, &[writer; 4]), (1, &[writer; 4])]);
                agent.add_or_replace_file(file, false).await
            });
        }

        let mut winners = 0;
        while let Some(joined) = tasks.join_next().await {
            if joined.unwrap().is_success() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // Both blocks come from the same writer.
        let first = agent.read_block("race.bin", 0).await.unwrap().unwrap();
        let second = agent.read_block("race.bin", 1).await.unwrap().unwrap();
        assert_eq!(first.data, second.data);
    }

    // ============================================================
    // STARTUP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_restart_rebuilds_catalog_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let agent = open_agent(dir.path()).await;
            let mut file = partial("kept.bin", 4, &[(1, b"bbbb"), (3, b"dd")]);
            file.file_size = Some(14);
            agent.add_or_replace_file(file, false).await;
        }

        // Junk next to the blocks must be ignored by the scan.
        let data_path = config(dir.path(), false).data_path();
        std::fs::write(data_path.join("kept.bin").join("notes.txt"), b"junk").unwrap();
        std::fs::write(data_path.join("kept.bin").join("block_x1"), b"junk").unwrap();
        std::fs::write(data_path.join("kept.bin").join("block_003"), b"junk").unwrap();

        let agent = NodeAgent::open(&config(dir.path(), false)).await.unwrap();

        let entry = agent.catalog().get("kept.bin").unwrap();
        assert_eq!(entry.indexes(), vec![1, 3]);
        assert_eq!(entry.blocks[&3], 2);
        assert_eq!(entry.total_block_count, 4);
        assert_eq!(entry.file_size, Some(14));
        let block = agent.read_block("kept.bin", 3).await.unwrap().unwrap();
        assert_eq!(block.data, b"dd");
    }

    #[tokio::test]
    async fn test_scan_without_manifest_uses_highest_index() {
        let dir = TempDir::new().unwrap();
        let file_dir = config(dir.path(), false).data_path().join("legacy.bin");
        std::fs::create_dir_all(&file_dir).unwrap();
        std::fs::write(file_dir.join(block_file_name(0)), b"aaaa").unwrap();
        std::fs::write(file_dir.join(block_file_name(1)), b"bb").unwrap();

        let agent = NodeAgent::open(&config(dir.path(), false)).await.unwrap();

        let entry = agent.catalog().get("legacy.bin").unwrap();
        assert!(!file_dir.join(FILE_META_NAME).exists());
        assert_eq!(entry.total_block_count, 2);
        assert_eq!(entry.stored_bytes(), 6);
    }

    #[tokio::test]
    async fn test_clear_on_start_empties_data_root() {
        let dir = TempDir::new().unwrap();
        {
            let agent = open_agent(dir.path()).await;
            agent
                .add_or_replace_file(partial("old.bin", 1, &[(0, b"old")]), false)
                .await;
        }

        let agent = open_agent(dir.path()).await;

        assert_eq!(agent.catalog().file_count(), 0);
        assert!(!agent.layout().file_dir("old.bin").exists());
        assert!(agent.layout().data_path().exists());
    }

    // ============================================================
    // NAMING & REGISTRATION TESTS
    // ============================================================

    #[test]
    fn test_parse_block_index() {
        assert_eq!(parse_block_index(&block_file_name(17)), Some(17));
        assert_eq!(parse_block_index("block_0"), Some(0));
        assert_eq!(parse_block_index("block_"), None);
        assert_eq!(parse_block_index("block_-1"), None);
        assert_eq!(parse_block_index("block_1.tmp"), None);
        assert_eq!(parse_block_index("block_007"), None);
        assert_eq!(parse_block_index("block_00"), None);
        assert_eq!(parse_block_index(".file_meta.json"), None);
    }

    #[tokio::test]
    async fn test_empty_node_registers_with_sentinel() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;

        let request = registration_request(&agent, "http://127.0.0.1:7100");

        assert_eq!(request.node_url, "http://127.0.0.1:7100");
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.files[0].file_name, REGISTRATION_SENTINEL);
    }

    #[tokio::test]
    async fn test_registration_reports_holdings() {
        let dir = TempDir::new().unwrap();
        let agent = open_agent(dir.path()).await;
        agent
            .add_or_replace_file(partial("b.bin", 3, &[(0, b"xx"), (2, b"y")]), false)
            .await;
        agent
            .add_or_replace_file(partial("a.bin", 1, &[(0, b"abc")]), false)
            .await;

        let request = registration_request(&agent, "http://node-a");

        let names: Vec<&str> = request.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["a.bin", "b.bin"]);
        assert_eq!(request.files[0].file_size, Some(3));
        assert_eq!(request.files[1].indexes, vec![0, 2]);
        assert_eq!(request.files[1].total_block_count, 3);
        assert_eq!(request.files[1].file_size, None);
    }
}
