//! Built-in test prompts

/// A named prompt; `title` becomes the invocation title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub key: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
}

pub const PRESETS: [Preset; 10] = [
    Preset {
        key: "knowledge",
        title: "Knowledge Q&A",
        prompt: "In Romance of the Three Kingdoms, which Wei general was scared off by \
                 Zhuge Liang's Empty Fort Strategy?",
    },
    Preset {
        key: "logic",
        title: "Logical reasoning",
        prompt: "There are three people. A says B is lying, B says C is lying, and C says \
                 both A and B are lying. Who is lying?",
    },
    Preset {
        key: "language",
        title: "Language understanding",
        prompt: "Explain the literal and figurative meaning of the idiom \
                 \"drawing legs on a snake\".",
    },
    Preset {
        key: "sentences",
        title: "Sentence generation",
        prompt: "Write 5 different complete sentences that all begin with \"Spring\".",
    },
    Preset {
        key: "code",
        title: "Code generation",
        prompt: "Write a Python program that implements quicksort and uses it to sort \
                 the list [5, 3, 8, 4, 2].",
    },
    Preset {
        key: "translation",
        title: "Translation",
        prompt: "Translate \"不到长城非好汉\" into English.",
    },
    Preset {
        key: "math",
        title: "Math",
        prompt: "A convenience store runs a promotion: buy 2 bottles of cola, get 1 free. \
                 Each bottle costs 5 dollars. Xiao Wang wants one bottle for each of 5 \
                 people, himself included. What is the least he has to spend?",
    },
    Preset {
        key: "sentiment",
        title: "Sentiment analysis",
        prompt: "What is the sentiment of this sentence: \"I was sure I'd win the jackpot, \
                 and I didn't even get a consolation prize. Just my luck!\"",
    },
    Preset {
        key: "creative",
        title: "Creative association",
        prompt: "If clouds were edible, what would they taste like, and why?",
    },
    Preset {
        key: "common-sense",
        title: "Common sense",
        prompt: "Do camels store water in their humps?",
    },
];

/// Look up a preset by key (case-insensitive)
pub fn find(key: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.key.eq_ignore_ascii_case(key.trim()))
}
