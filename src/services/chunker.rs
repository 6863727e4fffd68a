const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        TextSplitter {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = choose_separator(text, separators);

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();
        for split in splits {
            if char_len(&split) < self.chunk_size {
                fitting.push(split);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting, separator));
                fitting.clear();
            }
            if remaining.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting, separator));
        }
        chunks
    }

    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);
            let joiner = if current.is_empty() { 0 } else { sep_len };
            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, separator);
                while total > self.chunk_overlap
                    || (total > 0 && total + len + if current.is_empty() { 0 } else { sep_len } > self.chunk_size)
                {
                    let first = current.remove(0);
                    total -= char_len(first) + if current.is_empty() { 0 } else { sep_len };
                    if current.is_empty() {
                        total = 0;
                        break;
                    }
                }
            }
            current.push(split);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }
        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn choose_separator<'a, 'b>(text: &str, separators: &'b [&'a str]) -> (&'a str, &'b [&'a str]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (*separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn push_joined(docs: &mut Vec<String>, pieces: &[&str], separator: &str) {
    let joined = pieces.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
