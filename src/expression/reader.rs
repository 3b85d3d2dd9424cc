/// Character cursor over an expression string.
#[derive(Debug, Clone)]
pub struct ExprReader {
    chars: Vec<char>,
    mark: usize,
}

impl ExprReader {
    pub fn new(expr: &str) -> Self {
        Self {
            chars: expr.chars().collect(),
            mark: 0,
        }
    }

    pub fn mark(&self) -> usize {
        self.mark
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.mark).copied()
    }

    pub fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.mark += 1;
        Some(c)
    }

    pub fn skip(&mut self, num: usize) {
        self.mark = (self.mark + num).min(self.chars.len());
    }

    pub fn is_next_char(&self, c: char) -> bool {
        self.peek() == Some(c)
    }

    pub fn is_next_seq(&self, seq: &str) -> bool {
        let mut pos = self.mark;
        for c in seq.chars() {
            if self.chars.get(pos) != Some(&c) {
                return false;
            }
            pos += 1;
        }
        true
    }

    pub fn is_eof(&self) -> bool {
        self.mark >= self.chars.len()
    }

    pub fn read_func_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c == '(' || c.is_whitespace() {
                break;
            }
            name.push(c);
            self.mark += 1;
        }
        name
    }

    pub fn skip_whitespaces(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.mark += 1;
        }
    }

    /// Reads up to whitespace, an unmatched `)` or a top-level `,,`.
    pub fn read_next_parameter(&mut self) -> String {
        let mut param = String::new();
        let mut nested = 0i32;
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            match c {
                '(' => nested += 1,
                ')' => nested -= 1,
                _ => {}
            }
            if nested < 0 || (nested == 0 && self.is_next_seq(",,")) {
                break;
            }
            param.push(c);
            self.mark += 1;
        }
        param
    }
}
