use crate::{
    prompts::{FieldMap, encode_response_shape},
    records::TranslationRequestItem,
};

/// Output-token limits for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudget {
    pub output_tokens: u32,
    /// Estimated tokens per character of the reply JSON.
    pub token_factor: f64,
    pub thinking_tokens: u32,
}

impl TokenBudget {
    /// Tokens left for the visible reply.
    pub fn available(&self) -> u64 {
        u64::from(self.output_tokens.saturating_sub(self.thinking_tokens))
    }

    /// `ceil(len(reply JSON) * token_factor)` for a reply covering `items`.
    pub fn estimate(&self, items: &[TranslationRequestItem], fields: &FieldMap) -> u64 {
        let chars = encode_response_shape(items, fields).chars().count();
        (chars as f64 * self.token_factor).ceil() as u64
    }

    pub fn fits(&self, items: &[TranslationRequestItem], fields: &FieldMap) -> bool {
        self.estimate(items, fields) <= self.available()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packed {
    /// Take this many items from the front.
    Batch(usize),
    /// The first item alone is over budget.
    Oversized,
}

/// Greedily takes items from the front of `remaining` while the whole batch still fits.
/// The estimate is recomputed for every candidate batch. `None` when nothing is left.
pub fn pack_next(
    remaining: &[TranslationRequestItem],
    budget: &TokenBudget,
    fields: &FieldMap,
) -> Option<Packed> {
    if remaining.is_empty() {
        return None;
    }

    let mut len = 0;
    while len < remaining.len() && budget.fits(&remaining[..len + 1], fields) {
        len += 1;
    }

    Some(if len == 0 {
        Packed::Oversized
    } else {
        Packed::Batch(len)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step<'a> {
    Batch(&'a [TranslationRequestItem]),
    Skipped(&'a TranslationRequestItem),
}

/// Walks the selected items front to back, one batch or skipped item at a time.
pub struct Batches<'a> {
    items: &'a [TranslationRequestItem],
    budget: TokenBudget,
    fields: &'a FieldMap,
    position: usize,
}

impl<'a> Batches<'a> {
    pub fn new(
        items: &'a [TranslationRequestItem],
        budget: TokenBudget,
        fields: &'a FieldMap,
    ) -> Self {
        Self {
            items,
            budget,
            fields,
            position: 0,
        }
    }

    /// Items handed out so far, skipped ones included.
    pub fn consumed(&self) -> usize {
        self.position
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.items.len()
    }
}

impl<'a> Iterator for Batches<'a> {
    type Item = Step<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let items = self.items;
        let remaining = &items[self.position..];
        match pack_next(remaining, &self.budget, self.fields)? {
            Packed::Batch(len) => {
                self.position += len;
                Some(Step::Batch(&remaining[..len]))
            }
            Packed::Oversized => {
                self.position += 1;
                Some(Step::Skipped(&remaining[0]))
            }
        }
    }
}
