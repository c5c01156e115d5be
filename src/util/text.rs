/// タイトル正規化とフィンガープリント用ハッシュのユーティリティ。
use unicode_normalization::UnicodeNormalization;
use xxhash_rust::xxh3::xxh3_64;

/// タイトルを重複判定用に正規化する。
///
/// NFKC正規化、小文字化、空白の折りたたみを行う。プロバイダーごとの
/// 表記ゆれ（全角/半角、大文字小文字、余分な空白）を吸収する。
#[must_use]
pub fn fold_title(title: &str) -> String {
    let folded: String = title.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// テキストの64ビットハッシュ値を計算する（XXH3）。
#[must_use]
pub fn hash64(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_title_collapses_whitespace_and_case() {
        assert_eq!(fold_title("  Summer   Special "), "summer special");
        assert_eq!(fold_title("SUMMER Special"), "summer special");
    }

    #[test]
    fn fold_title_applies_compatibility_normalization() {
        // 全角英数は半角に正規化される
        assert_eq!(fold_title("ＨＤ　Ｓｐｅｃｉａｌ"), "hd special");
    }

    #[test]
    fn hash64_is_stable_for_equal_input() {
        assert_eq!(hash64("summer special"), hash64("summer special"));
        assert_ne!(hash64("summer special"), hash64("winter special"));
    }
}
