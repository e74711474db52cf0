mod article;
mod user;

pub use article::{join_tags, normalize_tags, split_tags, Article, ArticleList, CachedArticle};
pub(crate) use user::PreferenceDocument;
pub use user::{
    normalize_query, HistoryEntry, RecommendationSignals, SavedEntry, SearchHistoryEntry,
    UserPreference, UserProfile,
};
