//! Text normalization shared by the tariff index, classification scoring and turn parsing.

/// Lowercases and strips Latin diacritics (`Eléctrico` -> `electrico`).
pub fn normalize(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).map(fold_accent).collect()
}

fn fold_accent(character: char) -> char {
    match character {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Normalized alphanumeric tokens of at least `min_len` characters, in input order.
pub fn tokens(text: &str, min_len: usize) -> Vec<String> {
    normalize(text)
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| token.chars().count() >= min_len)
        .map(str::to_string)
        .collect()
}

/// Tokens used for label scoring: at least four characters, stop-words removed, deduplicated.
pub fn query_tokens(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in tokens(text, 4) {
        if is_stopword(&token) || token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}

const STOPWORDS: &[&str] = &[
    "para", "como", "este", "esta", "estos", "estas", "pero", "sobre", "entre", "desde", "hasta",
    "donde", "cuando", "quiero", "queria", "necesito", "importar", "importacion", "cotizar",
    "cotizacion", "traer", "comprar", "precio", "unidad", "unidades", "cantidad", "dolares",
    "tengo", "tiene", "tienen", "favor", "hola", "gracias", "buenas", "buenos", "dias", "tardes",
    "seria", "sera", "algo", "tipo", "marca", "modelo", "nuevo", "nueva", "usado", "usada", "with",
    "from", "that", "this", "unos", "unas", "otro", "otra", "otros", "otras", "cada", "mismo",
    "misma", "demas", "partes", "parte", "desde", "china", "origen", "the", "los", "las",
];

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}
