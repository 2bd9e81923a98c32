use log::debug;

/// Tuning knobs for the duplicate-detection heuristic. These are tuned
/// values, not invariants; adjust with care and measurement.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How far back in the transcript duplicate detection looks, in chars.
    pub tail_window_chars: usize,
    /// Minimum suffix/prefix overlap worth stripping, in chars.
    pub min_overlap_chars: usize,
    /// Word n-gram size for the near-repeat check.
    pub ngram_words: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tail_window_chars: 500,
            min_overlap_chars: 5,
            ngram_words: 3,
        }
    }
}

/// What `merge` did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fragment was empty or entirely duplicated; transcript unchanged.
    Discarded,
    /// Some or all of the fragment was appended.
    Appended,
}

/// A snapshot of the unclarified region handed to the clarify service.
/// `apply_clarified` uses the snapshot to detect merges that raced the
/// in-flight call.
#[derive(Debug, Clone)]
pub struct ClarifyBatch {
    /// Byte offset where the batch starts (the clarify cursor at slice time).
    pub start: usize,
    /// Byte offset just past the batch's final sentence terminator.
    pub end: usize,
    /// Exact transcript content of `start..end` at slice time.
    pub text: String,
}

/// Merges independently-transcribed, overlapping fragments into one
/// deduplicated transcript.
///
/// Each chunk is recognized with no cross-chunk state on the service side,
/// and adjacent chunks can re-transcribe trailing audio, so fragments
/// routinely repeat material the transcript already holds. The layered
/// heuristic here reduces visible duplication; it is approximate by
/// design and makes no alignment guarantees.
pub struct TranscriptReconciler {
    transcript: String,
    clarified_up_to: usize,
    config: ReconcilerConfig,
}

impl TranscriptReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            transcript: String::new(),
            clarified_up_to: 0,
            config,
        }
    }

    /// Resumes a session with previously accumulated text. The carried
    /// text counts as already clarified.
    pub fn with_text(config: ReconcilerConfig, text: String) -> Self {
        let clarified_up_to = text.len();
        Self {
            transcript: text,
            clarified_up_to,
            config,
        }
    }

    pub fn text(&self) -> &str {
        &self.transcript
    }

    pub fn clarified_up_to(&self) -> usize {
        self.clarified_up_to
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.clarified_up_to = 0;
    }

    /// The last `max_chars` characters of the transcript, used both for
    /// duplicate detection and as the recognition prompt context.
    pub fn tail_chars(&self, max_chars: usize) -> &str {
        let total = self.transcript.chars().count();
        if total <= max_chars {
            return &self.transcript;
        }
        let skip = total - max_chars;
        match self.transcript.char_indices().nth(skip) {
            Some((idx, _)) => &self.transcript[idx..],
            None => "",
        }
    }

    /// Merges a newly recognized fragment, stripping content the transcript
    /// tail already holds. Precedence: whole-fragment containment, word
    /// n-gram near-repeat, longest suffix/prefix overlap, wholesale append.
    pub fn merge(&mut self, fragment: &str) -> MergeOutcome {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return MergeOutcome::Discarded;
        }

        let tail = self.tail_chars(self.config.tail_window_chars);
        let tail_folded = fold_case(tail);
        let frag_folded = fold_case(fragment);

        if !tail_folded.is_empty() && tail_folded.contains(&frag_folded) {
            debug!("Discarding fragment fully contained in transcript tail");
            return MergeOutcome::Discarded;
        }

        if self.is_ngram_near_repeat(&tail_folded, &frag_folded) {
            debug!("Discarding fragment; most of its n-grams already present");
            return MergeOutcome::Discarded;
        }

        let tail_chars: Vec<char> = tail_folded.chars().collect();
        let frag_chars: Vec<char> = frag_folded.chars().collect();
        let overlap = longest_overlap(&tail_chars, &frag_chars, self.config.min_overlap_chars);

        let remainder = if overlap > 0 {
            debug!("Stripping {}-char boundary overlap", overlap);
            match fragment.char_indices().nth(overlap) {
                Some((idx, _)) => &fragment[idx..],
                None => "",
            }
        } else {
            fragment
        };

        if remainder.trim().is_empty() {
            return MergeOutcome::Discarded;
        }

        self.append_fragment(remainder);
        MergeOutcome::Appended
    }

    /// Scans the unclarified suffix for runs of sentence terminators and,
    /// once `batch_sentences` runs are complete, returns the slice to send
    /// for clarification. Does not move the cursor; that happens when the
    /// result is applied.
    pub fn next_clarify_batch(&self, batch_sentences: usize) -> Option<ClarifyBatch> {
        if batch_sentences == 0 {
            return None;
        }

        let start = self.clarified_up_to;
        let pending = &self.transcript[start..];

        let mut runs = 0usize;
        let mut in_run = false;
        let mut run_end = 0usize;
        let mut batch_end = None;

        for (i, c) in pending.char_indices() {
            if is_sentence_terminator(c) {
                in_run = true;
                run_end = i + c.len_utf8();
            } else if in_run {
                in_run = false;
                runs += 1;
                if runs == batch_sentences {
                    batch_end = Some(run_end);
                    break;
                }
            }
        }
        if batch_end.is_none() && in_run && runs + 1 >= batch_sentences {
            batch_end = Some(run_end);
        }

        let end = start + batch_end?;
        Some(ClarifyBatch {
            start,
            end,
            text: self.transcript[start..end].to_string(),
        })
    }

    /// Replaces the batch region with corrected text, but only when the
    /// region still holds the exact snapshot taken at slice time. Returns
    /// false (and leaves the transcript untouched) when a concurrent merge
    /// or clear invalidated the snapshot.
    pub fn apply_clarified(&mut self, batch: &ClarifyBatch, corrected: &str) -> bool {
        if batch.start != self.clarified_up_to
            || batch.end > self.transcript.len()
            || !self.transcript.is_char_boundary(batch.end)
            || self.transcript[batch.start..batch.end] != batch.text
        {
            return false;
        }

        self.transcript
            .replace_range(batch.start..batch.end, corrected);
        self.clarified_up_to = batch.start + corrected.len();
        true
    }

    fn is_ngram_near_repeat(&self, tail_folded: &str, frag_folded: &str) -> bool {
        let n = self.config.ngram_words;
        if tail_folded.is_empty() || n == 0 {
            return false;
        }
        let words: Vec<&str> = frag_folded.split_whitespace().collect();
        if words.len() < n {
            return false;
        }

        let total = words.len() - n + 1;
        let mut hits = 0usize;
        for window in words.windows(n) {
            let gram = window.join(" ");
            if tail_folded.contains(&gram) {
                hits += 1;
            }
        }
        hits * 2 > total
    }

    fn append_fragment(&mut self, fragment: &str) {
        if !self.transcript.is_empty()
            && !self.transcript.ends_with(char::is_whitespace)
            && !fragment.starts_with(char::is_whitespace)
        {
            self.transcript.push(' ');
        }
        self.transcript.push_str(fragment);
    }
}

fn is_sentence_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Per-char case folding, so folded offsets map one-to-one back into the
/// original string's char positions.
fn fold_case(s: &str) -> String {
    s.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// Longest suffix of `tail` that equals a prefix of `frag`, in chars.
/// Returns 0 when no overlap of at least `min_overlap` exists.
fn longest_overlap(tail: &[char], frag: &[char], min_overlap: usize) -> usize {
    let max = tail.len().min(frag.len());
    if max < min_overlap || min_overlap == 0 {
        return 0;
    }
    for len in (min_overlap..=max).rev() {
        if tail[tail.len() - len..] == frag[..len] {
            return len;
        }
    }
    0
}
