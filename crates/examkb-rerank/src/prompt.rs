//! Cross-encoder prompt layout and token budgeting.

pub const DEFAULT_SYSTEM: &str = "<|im_start|>system 请判断以下文档是否满足检索要求。<|im_end|>";
pub const DEFAULT_INSTRUCTION: &str = "判断文档与查询的语义相关性";
pub const TAIL: &str = "<|im_end|>";

/// Query/document pair rendered as three segments so the document can be
/// shortened without touching the query.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system: String,
    pub instruction: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { system: DEFAULT_SYSTEM.to_string(), instruction: DEFAULT_INSTRUCTION.to_string() }
    }
}

impl PromptTemplate {
    pub fn with_instruction(instruction: Option<&str>) -> Self {
        let mut t = Self::default();
        if let Some(i) = instruction.filter(|i| !i.trim().is_empty()) {
            t.instruction = i.to_string();
        }
        t
    }

    pub fn head(&self, query: &str) -> String {
        format!("{}<|im_start|>user 指令：{} 查询：{} 文档：", self.system, self.instruction, query)
    }

    pub fn tail(&self) -> &str { TAIL }
}

/// Join token segments so the result fits `max_len`, dropping only trailing
/// document tokens. Head and tail are always kept whole.
pub fn fit_to_budget(head: &[u32], doc: &[u32], tail: &[u32], max_len: usize) -> Vec<u32> {
    let room = max_len.saturating_sub(head.len() + tail.len());
    let doc = &doc[..doc.len().min(room)];
    let mut ids = Vec::with_capacity(head.len() + doc.len() + tail.len());
    ids.extend_from_slice(head);
    ids.extend_from_slice(doc);
    ids.extend_from_slice(tail);
    ids
}

/// Right-pad rows to a common width. Returns the flattened `[rows, width]` ids,
/// each row's real length, and the width.
pub fn pad_right(rows: &[Vec<u32>], pad: u32) -> (Vec<u32>, Vec<usize>, usize) {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut ids = Vec::with_capacity(rows.len() * width);
    for row in rows {
        ids.extend_from_slice(row);
        ids.extend(std::iter::repeat(pad).take(width - row.len()));
    }
    (ids, rows.iter().map(Vec::len).collect(), width)
}
