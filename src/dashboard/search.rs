use crate::models::Bookmark;

/// Whether `bookmark` shows up for `query`. Empty queries match everything.
pub fn matches(bookmark: &Bookmark, query: &str) -> bool {
    let needle = query.to_lowercase();
    bookmark.title.to_lowercase().contains(&needle) || bookmark.url.to_lowercase().contains(&needle)
}

/// Matching bookmarks in their original order.
pub fn filter<'a>(bookmarks: &'a [Bookmark], query: &str) -> Vec<&'a Bookmark> {
    if query.is_empty() {
        return bookmarks.iter().collect();
    }
    bookmarks.iter().filter(|b| matches(b, query)).collect()
}
