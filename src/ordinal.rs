//! Chapter ordinal recognition for titles and header prefixes.
//!
//! Books label chapters as `4`, `IV`, `Four`, `Fourth`, `Четвёртая`. All of
//! these should compare equal when matching TOC labels against backend chapter
//! titles, and all of them should be recognised when stripping a duplicated
//! header from description text.

/// Parse one token as a chapter number: ASCII digits, a Roman numeral, or a
/// spelled-out English/Russian cardinal or ordinal (1–20, tens to 50, and
/// hyphenated English compounds such as `twenty-one`).
pub(crate) fn parse_number_token(token: &str) -> Option<u32> {
    let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
    if token.is_empty() {
        return None;
    }
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse().ok().filter(|n| *n > 0);
    }
    if let Some(value) = parse_roman(token) {
        return Some(value);
    }
    parse_number_word(token)
}

/// Roman numerals I..=MMMCMXCIX in canonical subtractive form.
pub(crate) fn parse_roman(token: &str) -> Option<u32> {
    let upper = token.to_ascii_uppercase();
    if upper.is_empty() || !upper.bytes().all(|b| b"IVXLCDM".contains(&b)) {
        return None;
    }
    let value_of = |b: u8| -> i64 {
        match b {
            b'I' => 1,
            b'V' => 5,
            b'X' => 10,
            b'L' => 50,
            b'C' => 100,
            b'D' => 500,
            _ => 1000,
        }
    };
    let bytes = upper.as_bytes();
    let mut total = 0i64;
    for (idx, byte) in bytes.iter().enumerate() {
        let current = value_of(*byte);
        let next = bytes.get(idx + 1).map(|b| value_of(*b)).unwrap_or(0);
        if current < next {
            total -= current;
        } else {
            total += current;
        }
    }
    let total = u32::try_from(total).ok().filter(|n| *n > 0)?;
    // Reject non-canonical spellings such as "IIII" or "VX".
    if to_roman(total) != upper {
        return None;
    }
    Some(total)
}

fn to_roman(mut value: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (amount, glyph) in TABLE {
        while value >= amount {
            out.push_str(glyph);
            value -= amount;
        }
    }
    out
}

/// Spelled-out numbers. Case-insensitive; `ё` is treated as `е`.
pub(crate) fn parse_number_word(token: &str) -> Option<u32> {
    let lowered: String = token
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c == 'ё' { 'е' } else { c })
        .collect();
    if let Some((tens, units)) = lowered.split_once('-') {
        let tens = english_word(tens).filter(|n| *n >= 20 && n % 10 == 0)?;
        let units = english_word(units).filter(|n| *n < 10)?;
        return Some(tens + units);
    }
    english_word(&lowered).or_else(|| russian_word(&lowered))
}

fn english_word(word: &str) -> Option<u32> {
    let value = match word {
        "one" | "first" => 1,
        "two" | "second" => 2,
        "three" | "third" => 3,
        "four" | "fourth" => 4,
        "five" | "fifth" => 5,
        "six" | "sixth" => 6,
        "seven" | "seventh" => 7,
        "eight" | "eighth" => 8,
        "nine" | "ninth" => 9,
        "ten" | "tenth" => 10,
        "eleven" | "eleventh" => 11,
        "twelve" | "twelfth" => 12,
        "thirteen" | "thirteenth" => 13,
        "fourteen" | "fourteenth" => 14,
        "fifteen" | "fifteenth" => 15,
        "sixteen" | "sixteenth" => 16,
        "seventeen" | "seventeenth" => 17,
        "eighteen" | "eighteenth" => 18,
        "nineteen" | "nineteenth" => 19,
        "twenty" | "twentieth" => 20,
        "thirty" | "thirtieth" => 30,
        "forty" | "fortieth" => 40,
        "fifty" | "fiftieth" => 50,
        _ => return None,
    };
    Some(value)
}

fn russian_word(word: &str) -> Option<u32> {
    // Cardinals first, then ordinal stems that take gendered endings.
    let cardinal = match word {
        "один" | "одна" | "одно" => Some(1),
        "два" | "две" => Some(2),
        "три" => Some(3),
        "четыре" => Some(4),
        "пять" => Some(5),
        "шесть" => Some(6),
        "семь" => Some(7),
        "восемь" => Some(8),
        "девять" => Some(9),
        "десять" => Some(10),
        "одиннадцать" => Some(11),
        "двенадцать" => Some(12),
        "тринадцать" => Some(13),
        "четырнадцать" => Some(14),
        "пятнадцать" => Some(15),
        "шестнадцать" => Some(16),
        "семнадцать" => Some(17),
        "восемнадцать" => Some(18),
        "девятнадцать" => Some(19),
        "двадцать" => Some(20),
        "тридцать" => Some(30),
        "сорок" => Some(40),
        "пятьдесят" => Some(50),
        _ => None,
    };
    if cardinal.is_some() {
        return cardinal;
    }

    const ORDINAL_STEMS: [(&str, u32); 23] = [
        ("перв", 1),
        ("втор", 2),
        ("трет", 3),
        ("четверт", 4),
        ("пят", 5),
        ("шест", 6),
        ("седьм", 7),
        ("восьм", 8),
        ("девят", 9),
        ("десят", 10),
        ("одиннадцат", 11),
        ("двенадцат", 12),
        ("тринадцат", 13),
        ("четырнадцат", 14),
        ("пятнадцат", 15),
        ("шестнадцат", 16),
        ("семнадцат", 17),
        ("восемнадцат", 18),
        ("девятнадцат", 19),
        ("двадцат", 20),
        ("тридцат", 30),
        ("сороков", 40),
        ("пятидесят", 50),
    ];
    const ENDINGS: [&str; 10] = ["ая", "ый", "ой", "ое", "ий", "ья", "ье", "ые", "ую", "ого"];

    ORDINAL_STEMS.iter().find_map(|(stem, value)| {
        let ending = word.strip_prefix(stem)?;
        ENDINGS.contains(&ending).then_some(*value)
    })
}

/// First chapter ordinal found in a title, if any.
///
/// Roman numerals are only trusted right after a chapter keyword or when they
/// make up the whole title, so the English pronoun "I" is not read as 1.
pub(crate) fn ordinal_in_title(title: &str) -> Option<u32> {
    let tokens: Vec<&str> = title
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | ':' | ',' | '(' | ')'))
        .filter(|t| !t.is_empty())
        .collect();
    let whole_title = tokens.len() == 1;
    let mut after_keyword = false;
    for token in &tokens {
        let lowered = token.to_lowercase();
        if is_chapter_keyword(&lowered) {
            after_keyword = true;
            continue;
        }
        if token.bytes().all(|b| b.is_ascii_digit()) {
            return parse_number_token(token);
        }
        if (after_keyword || whole_title) && parse_roman(token).is_some() {
            return parse_roman(token);
        }
        if let Some(value) = parse_number_word(token) {
            if after_keyword || whole_title {
                return Some(value);
            }
        }
        after_keyword = false;
    }
    None
}

pub(crate) fn is_chapter_keyword(lowered: &str) -> bool {
    matches!(
        lowered,
        "chapter" | "part" | "book" | "volume" | "глава" | "часть" | "книга" | "том"
    )
}
