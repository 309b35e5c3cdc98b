//! Query pre-classifier.
//!
//! Runs before any model call so the recency policy is applied early.
//! The planner never invents a category: whatever this table (or an
//! explicit caller-provided category) says is what the policy sees.

use domovoy_core::search::SearchCategory;

/// Keyword patterns per category, Russian and English. Order matters:
/// the first matching category wins.
const PATTERNS: &[(SearchCategory, &[&str])] = &[
    (
        SearchCategory::News,
        &[
            "новости",
            "news",
            "сегодня",
            "вчера",
            "today",
            "yesterday",
            "случилось",
            "happened",
            "events",
        ],
    ),
    (
        SearchCategory::TechNews,
        &[
            "ai news",
            "tech news",
            "новости технологий",
            "новости ai",
            "выпустили",
            "released",
            "анонс",
            "announcement",
        ],
    ),
    (
        SearchCategory::Weather,
        &[
            "погода",
            "weather",
            "температура",
            "temperature",
            "прогноз",
            "forecast",
            "дождь",
            "rain",
            "снег",
            "snow",
        ],
    ),
    (
        SearchCategory::Transport,
        &[
            "расписание",
            "schedule",
            "поезд",
            "train",
            "электричка",
            "suburban",
            "автобус",
            "bus",
            "рейс",
            "flight",
        ],
    ),
    (
        SearchCategory::Stocks,
        &[
            "курс",
            "rate",
            "акции",
            "stocks",
            "биржа",
            "exchange",
            "цена акции",
            "stock price",
            "котировки",
            "quotes",
        ],
    ),
    (
        SearchCategory::Sports,
        &[
            "счёт",
            "score",
            "матч",
            "match",
            "игра",
            "game",
            "чемпионат",
            "championship",
            "турнир",
            "tournament",
        ],
    ),
    (
        SearchCategory::TechDocs,
        &[
            "документация",
            "documentation",
            "api",
            "docs",
            "reference",
            "specification",
        ],
    ),
    (
        SearchCategory::Tutorials,
        &[
            "как ",
            "how to",
            "инструкция",
            "tutorial",
            "guide",
            "научиться",
            "learn",
            "пошагово",
            "step by step",
        ],
    ),
    (
        SearchCategory::Shopping,
        &[
            "купить",
            "buy",
            "цена",
            "price",
            "стоимость",
            "cost",
            "магазин",
            "shop",
            "заказать",
            "order",
        ],
    ),
    (
        SearchCategory::Historical,
        &[
            "история",
            "historical",
            "когда был",
            "when was",
            "в каком году",
            "what year",
            "кто был",
            "who was",
            "биография",
            "biography",
        ],
    ),
];

/// Classify a free-text query into a search category. Defaults to
/// `General` when nothing matches.
pub fn classify(query: &str) -> SearchCategory {
    let query_lower = query.to_lowercase();

    for (category, patterns) in PATTERNS {
        if patterns.iter().any(|p| query_lower.contains(p)) {
            tracing::debug!(category = %category, "query pre-classified");
            return *category;
        }
    }

    SearchCategory::General
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_news() {
        assert_eq!(classify("новости про AI сегодня"), SearchCategory::News);
        assert_eq!(classify("what happened in the world"), SearchCategory::News);
    }

    #[test]
    fn test_classify_weather() {
        assert_eq!(classify("какая погода в Москве"), SearchCategory::Weather);
    }

    #[test]
    fn test_classify_transport() {
        assert_eq!(classify("расписание электричек"), SearchCategory::Transport);
    }

    #[test]
    fn test_classify_stocks() {
        assert_eq!(classify("курс акций Tesla"), SearchCategory::Stocks);
    }

    #[test]
    fn test_classify_tech_docs() {
        assert_eq!(classify("документация FastAPI"), SearchCategory::TechDocs);
    }

    #[test]
    fn test_classify_tutorials() {
        assert_eq!(classify("как настроить Docker"), SearchCategory::Tutorials);
    }

    #[test]
    fn test_classify_shopping() {
        assert_eq!(classify("купить iPhone 15"), SearchCategory::Shopping);
    }

    #[test]
    fn test_classify_historical() {
        assert_eq!(classify("когда был основан Рим"), SearchCategory::Historical);
    }

    #[test]
    fn test_classify_general_fallback() {
        assert_eq!(classify("какие-то общие вопросы"), SearchCategory::General);
    }
}
