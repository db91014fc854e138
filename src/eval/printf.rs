//! `printf` and the escape handling it shares with `echo -e`

use super::io::IoFrame;
use super::{ExecError, Shell};

/// Expand backslash escapes the way `echo -e` and `%b` do. The flag is
/// set when `\c` asked for output to stop.
pub(crate) fn echo_escapes(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'e' | 'E' => out.push('\x1b'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            'c' => return (out, true),
            '0' => {
                let mut value = 0;
                for _ in 0..3 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.extend(char::from_u32(value));
            }
            'x' => {
                let mut value = 0;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    out.push_str("\\x");
                } else {
                    out.extend(char::from_u32(value));
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    (out, false)
}

/// Quote `text` so the shell reads it back as one word
pub(crate) fn shell_quote(text: &str) -> String {
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+%@".contains(c))
    {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

/// Result of running a format string over its arguments
#[derive(Debug, Default)]
pub(crate) struct Formatted {
    pub text: String,
    /// Arguments that were not valid numbers
    pub errors: Vec<String>,
}

/// Apply `format` to `args`, reusing the format while arguments remain
pub(crate) fn format(format: &str, args: &[String]) -> Result<Formatted, String> {
    let mut out = Formatted::default();
    let mut next = 0;
    loop {
        let before = next;
        let stop = format_once(format, args, &mut next, &mut out)?;
        if stop || next >= args.len() || next == before {
            break;
        }
    }
    Ok(out)
}

fn format_once(format: &str, args: &[String], next: &mut usize, out: &mut Formatted) -> Result<bool, String> {
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let end = escape_end(&chars, i);
                let raw: String = chars[i..end].iter().collect();
                let (text, stop) = echo_escapes(&raw);
                out.text.push_str(&text);
                if stop {
                    return Ok(true);
                }
                i = end;
            }
            '%' if chars.get(i + 1) == Some(&'%') => {
                out.text.push('%');
                i += 2;
            }
            '%' => {
                let (spec, end) = parse_spec(&chars, i + 1, args, next)?;
                i = end;
                let arg = args.get(*next).cloned();
                if arg.is_some() {
                    *next += 1;
                }
                if convert(&spec, arg.as_deref(), out) {
                    return Ok(true);
                }
            }
            c => {
                out.text.push(c);
                i += 1;
            }
        }
    }
    Ok(false)
}

/// Index just past the escape sequence starting at `chars[i]`
fn escape_end(chars: &[char], i: usize) -> usize {
    match chars.get(i + 1) {
        Some('0') => {
            let digits = chars[i + 2..].iter().take(3).take_while(|c| c.is_digit(8)).count();
            i + 2 + digits
        }
        Some('x') => {
            let digits = chars[i + 2..].iter().take(2).take_while(|c| c.is_ascii_hexdigit()).count();
            i + 2 + digits
        }
        Some(_) => i + 2,
        None => i + 1,
    }
}

fn parse_spec(chars: &[char], mut i: usize, args: &[String], next: &mut usize) -> Result<(Spec, usize), String> {
    let mut spec = Spec::default();
    while let Some(&c) = chars.get(i) {
        match c {
            '-' => spec.left = true,
            '0' => spec.zero = true,
            '+' => spec.plus = true,
            ' ' => spec.space = true,
            '#' => spec.alt = true,
            _ => break,
        }
        i += 1;
    }
    let star = |next: &mut usize| {
        let value = args.get(*next).and_then(|a| a.trim().parse::<i64>().ok()).unwrap_or(0);
        *next += 1;
        value
    };
    if chars.get(i) == Some(&'*') {
        let width = star(next);
        if width < 0 {
            spec.left = true;
        }
        spec.width = Some(width.unsigned_abs() as usize);
        i += 1;
    } else {
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            spec.width = chars[start..i].iter().collect::<String>().parse().ok();
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        if chars.get(i) == Some(&'*') {
            spec.precision = Some(star(next).max(0) as usize);
            i += 1;
        } else {
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            spec.precision = Some(chars[start..i].iter().collect::<String>().parse().unwrap_or(0));
        }
    }
    // Length modifiers mean nothing here
    while chars.get(i).is_some_and(|c| "hlLjzt".contains(*c)) {
        i += 1;
    }
    match chars.get(i) {
        Some(&c) if "diouxXeEfFgGsbcq".contains(c) => {
            spec.conversion = c;
            Ok((spec, i + 1))
        }
        Some(&c) => Err(format!("`{}': invalid format character", c)),
        None => Err("missing format character".to_string()),
    }
}

/// Write one conversion. Returns true when `%b` hit `\c`.
fn convert(spec: &Spec, arg: Option<&str>, out: &mut Formatted) -> bool {
    let text = match spec.conversion {
        's' => {
            let s = arg.unwrap_or("");
            truncate(s, spec.precision)
        }
        'q' => shell_quote(arg.unwrap_or("")),
        'b' => {
            let (text, stop) = echo_escapes(arg.unwrap_or(""));
            let text = truncate(&text, spec.precision);
            out.text.push_str(&pad(spec, text));
            return stop;
        }
        'c' => arg.and_then(|s| s.chars().next()).map(String::from).unwrap_or_default(),
        'd' | 'i' => {
            let n = integer_arg(arg, out);
            let digits = with_precision(n.unsigned_abs().to_string(), spec.precision);
            let sign = if n < 0 {
                "-"
            } else if spec.plus {
                "+"
            } else if spec.space {
                " "
            } else {
                ""
            };
            return push_number(spec, sign, digits, out);
        }
        'o' | 'u' | 'x' | 'X' => {
            let n = integer_arg(arg, out) as u64;
            let (digits, prefix) = match spec.conversion {
                'o' => (format!("{:o}", n), if spec.alt && n != 0 { "0" } else { "" }),
                'x' => (format!("{:x}", n), if spec.alt && n != 0 { "0x" } else { "" }),
                'X' => (format!("{:X}", n), if spec.alt && n != 0 { "0X" } else { "" }),
                _ => (n.to_string(), ""),
            };
            let digits = with_precision(digits, spec.precision);
            return push_number(spec, prefix, digits, out);
        }
        _ => {
            let value = float_arg(arg, out);
            let body = format_float(value.abs(), spec);
            let sign = if value.is_sign_negative() && value != 0.0 {
                "-"
            } else if spec.plus {
                "+"
            } else if spec.space {
                " "
            } else {
                ""
            };
            return push_number(spec, sign, body, out);
        }
    };
    out.text.push_str(&pad(spec, text));
    false
}

fn truncate(s: &str, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    }
}

fn with_precision(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

fn push_number(spec: &Spec, prefix: &str, digits: String, out: &mut Formatted) -> bool {
    let zero = spec.zero && !spec.left && (spec.precision.is_none() || "eEfFgG".contains(spec.conversion));
    let width = spec.width.unwrap_or(0);
    let len = prefix.len() + digits.len();
    let text = if zero && len < width {
        format!("{}{}{}", prefix, "0".repeat(width - len), digits)
    } else {
        pad(spec, format!("{}{}", prefix, digits))
    };
    out.text.push_str(&text);
    false
}

fn pad(spec: &Spec, text: String) -> String {
    let width = spec.width.unwrap_or(0);
    let len = text.chars().count();
    if len >= width {
        return text;
    }
    let fill = " ".repeat(width - len);
    if spec.left {
        text + &fill
    } else {
        fill + &text
    }
}

/// Parse a numeric argument: decimal, `0x` hex, `0` octal, or `'c` for a
/// character code. Bad input is recorded and counts as 0.
fn integer_arg(arg: Option<&str>, out: &mut Formatted) -> i64 {
    let Some(raw) = arg else {
        return 0;
    };
    let s = raw.trim();
    if let Some(rest) = s.strip_prefix('\'').or_else(|| s.strip_prefix('"')) {
        return rest.chars().next().map_or(0, |c| c as i64);
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    };
    match parsed {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => {
            out.errors.push(raw.to_string());
            0
        }
    }
}

fn float_arg(arg: Option<&str>, out: &mut Formatted) -> f64 {
    let Some(raw) = arg else {
        return 0.0;
    };
    let s = raw.trim();
    if let Some(rest) = s.strip_prefix('\'').or_else(|| s.strip_prefix('"')) {
        return rest.chars().next().map_or(0.0, |c| c as u32 as f64);
    }
    match s.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            out.errors.push(raw.to_string());
            0.0
        }
    }
}

fn format_float(value: f64, spec: &Spec) -> String {
    let precision = spec.precision.unwrap_or(6);
    let upper = spec.conversion.is_ascii_uppercase();
    let text = match spec.conversion.to_ascii_lowercase() {
        'f' => format!("{:.*}", precision, value),
        'e' => exponent_form(value, precision),
        _ => {
            let p = precision.max(1);
            let exp = if value == 0.0 { 0 } else { value.log10().floor() as i32 };
            let mut text = if exp < -4 || exp >= p as i32 {
                exponent_form(value, p - 1)
            } else {
                format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, value)
            };
            if !spec.alt {
                text = strip_zeros(&text);
            }
            text
        }
    };
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

/// `1.5e+03` style, as C prints it
fn exponent_form(value: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

fn strip_zeros(text: &str) -> String {
    let (mantissa, exp) = match text.find('e') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };
    if !mantissa.contains('.') {
        return text.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, exp)
}

impl Shell {
    /// `printf [-v var] format [args...]`
    pub(crate) fn builtin_printf(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let (target, rest) = match args {
            [flag, name, rest @ ..] if flag == "-v" => (Some(name.as_str()), rest),
            [flag, rest @ ..] if flag == "--" => (None, rest),
            _ => (None, args),
        };
        let Some((fmt, values)) = rest.split_first() else {
            return Err(ExecError::usage("printf", "usage: printf [-v var] format [arguments]"));
        };
        let formatted = format(fmt, values).map_err(|msg| ExecError::builtin("printf", msg))?;
        for bad in &formatted.errors {
            io.stderr.line(&format!("posh: printf: {}: invalid number", bad));
        }
        match target {
            Some(name) => self.env.set_scalar(name, formatted.text)?,
            None => io.stdout.write_str(&formatted.text)?,
        }
        Ok(i32::from(!formatted.errors.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(f: &str, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        format(f, &args).unwrap().text
    }

    #[test]
    fn test_basic_conversions() {
        assert_eq!(fmt("%s-%d\\n", &["a", "42"]), "a-42\n");
        assert_eq!(fmt("%5s|%-5s|", &["ab", "cd"]), "   ab|cd   |");
        assert_eq!(fmt("%05d %x %X %o", &["42", "255", "255", "8"]), "00042 ff FF 10");
        assert_eq!(fmt("%c%c", &["hello", "world"]), "hw");
        assert_eq!(fmt("%%", &[]), "%");
    }

    #[test]
    fn test_format_reused_for_extra_args() {
        assert_eq!(fmt("%s\\n", &["a", "b", "c"]), "a\nb\nc\n");
        assert_eq!(fmt("%s=%s ", &["a", "1", "b"]), "a=1 b= ");
    }

    #[test]
    fn test_floats() {
        assert_eq!(fmt("%.2f", &["3.14159"]), "3.14");
        assert_eq!(fmt("%e", &["1500"]), "1.500000e+03");
        assert_eq!(fmt("%g", &["0.0001"]), "0.0001");
        assert_eq!(fmt("%g", &["1000000"]), "1e+06");
        assert_eq!(fmt("%g", &["2.50"]), "2.5");
    }

    #[test]
    fn test_invalid_number_is_zero() {
        let out = format("%d", &["abc".to_string()]).unwrap();
        assert_eq!(out.text, "0");
        assert_eq!(out.errors, vec!["abc".to_string()]);
    }

    #[test]
    fn test_char_code_argument() {
        assert_eq!(fmt("%d", &["'A"]), "65");
    }

    #[test]
    fn test_echo_escapes_stop() {
        assert_eq!(echo_escapes("a\\tb"), ("a\tb".to_string(), false));
        assert_eq!(echo_escapes("a\\cb"), ("a".to_string(), true));
        assert_eq!(echo_escapes("\\0101"), ("A".to_string(), false));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote(""), "''");
    }
}
