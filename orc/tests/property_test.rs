//! Property tests for ordering and backpressure invariants

use std::sync::Arc;

use proptest::prelude::*;

use orc::domain::{EntryKind, TaskId, TranscriptEntry};
use orc::driver::{MarkerScanner, TerminalMarker, scan};
use orc::events::{Event, EventBus, EventFilter};
use orc::store::StoreHandle;

fn marker_strategy() -> impl Strategy<Value = (String, TerminalMarker)> {
    prop_oneof![
        Just((
            "<phase_complete>true</phase_complete>".to_string(),
            TerminalMarker::Complete
        )),
        "[a-z ]{1,20}".prop_map(|reason| {
            (
                format!("<phase_blocked>reason: {}</phase_blocked>", reason.trim()),
                TerminalMarker::Blocked {
                    reason: reason.trim().to_string(),
                },
            )
        }),
    ]
}

proptest! {
    /// Scanning is invariant under how the stream is chunked: any split of
    /// the same text yields the same terminal marker.
    #[test]
    fn marker_scan_split_invariant(
        prefix in "[a-z \n]{0,40}",
        suffix in "[a-z \n]{0,40}",
        (marker_text, expected) in marker_strategy(),
        chunk_size in 1usize..9,
    ) {
        let text = format!("{}{}{}", prefix, marker_text, suffix);
        prop_assert_eq!(scan(&text), Some(expected.clone()));

        let mut scanner = MarkerScanner::new();
        let bytes = text.as_bytes();
        let mut at = 0;
        while at < bytes.len() {
            let mut end = (at + chunk_size).min(bytes.len());
            while !text.is_char_boundary(end) {
                end += 1;
            }
            scanner.feed(&text[at..end]);
            at = end;
        }
        prop_assert_eq!(scanner.marker(), Some(&expected));
    }

    /// Text with no marker never produces one, however it is chunked.
    #[test]
    fn marker_scan_no_false_positives(text in "[a-z <>/\n]{0,80}", chunk_size in 1usize..9) {
        prop_assume!(!text.contains("<phase_complete>true</phase_complete>"));
        prop_assume!(!(text.contains("<phase_blocked>") && text.contains("</phase_blocked>")));

        let mut scanner = MarkerScanner::new();
        let mut at = 0;
        while at < text.len() {
            let end = (at + chunk_size).min(text.len());
            scanner.feed(&text[at..end]);
            at = end;
        }
        prop_assert_eq!(scanner.marker(), None);
    }

    /// Overflow always drops exactly the oldest events and counts them;
    /// the survivors arrive in publish order.
    #[test]
    fn bus_drops_oldest_and_counts(capacity in 1usize..64, published in 0usize..200) {
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut sub = bus.subscribe_with_capacity(EventFilter::all(), capacity);

        for i in 0..published {
            bus.publish(Event::ProgressTick {
                task_id: TaskId::from_seq(1),
                message: format!("m{}", i),
            });
        }

        let expected_dropped = published.saturating_sub(capacity) as u64;
        prop_assert_eq!(sub.dropped_count(), expected_dropped);

        let mut received = Vec::new();
        while let Some(Event::ProgressTick { message, .. }) = sub.try_recv() {
            received.push(message);
        }
        let expected: Vec<String> = (published.saturating_sub(capacity)..published)
            .map(|i| format!("m{}", i))
            .collect();
        prop_assert_eq!(received, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Concurrent appends from any number of writers always produce a
    /// gap-free, duplicate-free sequence per phase.
    #[test]
    fn transcript_sequences_gap_free_under_interleaving(writers in 1usize..6, per_writer in 1usize..10) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let store = StoreHandle::spawn_in_memory().unwrap();
            let task = store.create_task("p", "d", None, None, "main").await.unwrap();

            let mut handles = Vec::new();
            for w in 0..writers {
                let store = store.clone();
                let task_id = task.id.clone();
                handles.push(tokio::spawn(async move {
                    for i in 0..per_writer {
                        let entry = TranscriptEntry::new(
                            task_id.clone(),
                            "implement",
                            EntryKind::AssistantText,
                            format!("w{}-{}", w, i),
                        );
                        store.append_transcript(entry).await.unwrap();
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            let transcript = store.load_transcript(&task.id, "implement").await.unwrap();
            let seqs: Vec<u64> = transcript.iter().map(|e| e.seq).collect();
            let expected: Vec<u64> = (1..=(writers * per_writer) as u64).collect();
            assert_eq!(seqs, expected);
        });
    }
}
