//! Fixed content the games draw from.

/// (crew topic, imposter topic)
pub const TOPICS: &[(&str, &str)] = &[
    ("Lion", "Large Feline"),
    ("Pizza", "Italian Food"),
    ("France", "European Country"),
    ("Guitar", "Musical Instrument"),
    ("Apple", "Fruit"),
    ("Mars", "Planet"),
    ("Titanic", "Famous Ship"),
    ("Mona Lisa", "Famous Painting"),
    ("Basketball", "Ball Sport"),
    ("Sushi", "Japanese Food"),
    ("Elephant", "Large Herbivore"),
    ("London", "Major City"),
    ("Spiderman", "Superhero"),
    ("Minecraft", "Video Game"),
    ("Harry Potter", "Book Character"),
];

pub const WORDS: &[&str] = &[
    "APPLE", "BRAVE", "CRANE", "DREAM", "EAGLE", "FLAME", "GRAPE", "HOUSE", "IVORY", "JOLLY",
    "KNIFE", "LEMON", "MANGO", "NOBLE", "OCEAN", "PIANO", "QUEEN", "RIVER", "STONE", "TIGER",
    "UNCLE", "VIVID", "WHALE", "YOUTH", "ZEBRA", "BREAD", "CHAIR", "DANCE", "ERASE", "FROST",
    "GHOST", "HEART", "LIGHT", "MONEY", "NIGHT", "PLANT", "SMILE", "TRAIN", "WATER", "WORLD",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_five_uppercase_letters() {
        for word in WORDS {
            assert_eq!(word.len(), 5, "{word}");
            assert!(word.chars().all(|c| c.is_ascii_uppercase()), "{word}");
        }
    }

    #[test]
    fn test_topic_pairs_are_distinct() {
        for (crew, imposter) in TOPICS {
            assert_ne!(crew, imposter);
            assert!(!crew.is_empty() && !imposter.is_empty());
        }
    }
}
