//! Registry of launchable apps.
//!
//! The model names apps by display name ("微信", "Chrome"); the device needs a
//! package. Lookups fall back to a case-insensitive match so "chrome" and
//! "Chrome" resolve alike.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Resolves display names to Android package names.
pub trait AppRegistry: Send + Sync {
    /// Package for `name`, if the app is known.
    fn resolve(&self, name: &str) -> Option<&str>;

    /// Display name for a package, used to report the foreground app.
    fn name_for_package(&self, package: &str) -> Option<&str>;

    /// All known display names, sorted.
    fn names(&self) -> Vec<&str>;
}

/// Built-in display name to package table.
const BUILTIN_APPS: &[(&str, &str)] = &[
    // Messaging and social
    ("微信", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("微博", "com.sina.weibo"),
    ("小红书", "com.xingin.xhs"),
    ("豆瓣", "com.douban.frodo"),
    ("知乎", "com.zhihu.android"),
    // Shopping
    ("淘宝", "com.taobao.taobao"),
    ("淘宝闪购", "com.taobao.taobao"),
    ("京东", "com.jingdong.app.mall"),
    ("京东秒送", "com.jingdong.app.mall"),
    ("拼多多", "com.xunmeng.pinduoduo"),
    // Maps, food and travel
    ("高德地图", "com.autonavi.minimap"),
    ("百度地图", "com.baidu.BaiduMap"),
    ("美团", "com.sankuai.meituan"),
    ("大众点评", "com.dianping.v1"),
    ("饿了么", "me.ele"),
    ("肯德基", "com.yek.android.kfc.activitys"),
    ("携程", "ctrip.android.view"),
    ("铁路12306", "com.MobileTicket"),
    ("12306", "com.MobileTicket"),
    ("去哪儿", "com.Qunar"),
    ("去哪儿旅行", "com.Qunar"),
    ("滴滴出行", "com.sdu.did.psnger"),
    // Video, music and reading
    ("bilibili", "tv.danmaku.bili"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("快手", "com.smile.gifmaker"),
    ("腾讯视频", "com.tencent.qqlive"),
    ("爱奇艺", "com.qiyi.video"),
    ("优酷视频", "com.youku.phone"),
    ("芒果TV", "com.hunantv.imgo.activity"),
    ("红果短剧", "com.phoenix.read"),
    ("网易云音乐", "com.netease.cloudmusic"),
    ("QQ音乐", "com.tencent.qqmusic"),
    ("汽水音乐", "com.luna.music"),
    ("喜马拉雅", "com.ximalaya.ting.android"),
    ("番茄小说", "com.dragon.read"),
    ("番茄免费小说", "com.dragon.read"),
    ("七猫免费小说", "com.kmxs.reader"),
    // Work, news and everything else
    ("飞书", "com.ss.android.lark"),
    ("QQ邮箱", "com.tencent.androidqqmail"),
    ("豆包", "com.larus.nova"),
    ("Keep", "com.gotokeep.keep"),
    ("美柚", "com.lingan.seeyou"),
    ("腾讯新闻", "com.tencent.news"),
    ("今日头条", "com.ss.android.article.news"),
    ("贝壳找房", "com.lianjia.beike"),
    ("安居客", "com.anjuke.android.app"),
    ("同花顺", "com.hexin.plat.android"),
    ("星穹铁道", "com.miHoYo.hkrpg"),
    ("崩坏：星穹铁道", "com.miHoYo.hkrpg"),
    ("恋与深空", "com.papegames.lysk.cn"),
    // Stock Android and international apps
    ("Settings", "com.android.settings"),
    ("Android System Settings", "com.android.settings"),
    ("AudioRecorder", "com.android.soundrecorder"),
    ("Bluecoins", "com.rammigsoftware.bluecoins"),
    ("Broccoli", "com.flauschcode.broccoli"),
    ("Booking.com", "com.booking"),
    ("Booking", "com.booking"),
    ("Chrome", "com.android.chrome"),
    ("Google Chrome", "com.android.chrome"),
    ("Clock", "com.android.deskclock"),
    ("Contacts", "com.android.contacts"),
    ("Duolingo", "com.duolingo"),
    ("Expedia", "com.expedia.bookings"),
    ("Files", "com.android.fileexplorer"),
    ("File Manager", "com.android.fileexplorer"),
    ("Gmail", "com.google.android.gm"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("Maps", "com.google.android.apps.maps"),
    ("YouTube", "com.google.android.youtube"),
    ("Camera", "com.android.camera"),
    ("Gallery", "com.android.gallery3d"),
    ("Calculator", "com.android.calculator2"),
    ("Calendar", "com.android.calendar"),
    ("Messages", "com.android.mms"),
    ("Phone", "com.android.dialer"),
];

/// Shared instance of the built-in registry.
pub static DEFAULT_APPS: Lazy<StaticAppRegistry> = Lazy::new(StaticAppRegistry::builtin);

/// In-memory registry, optionally extended with user entries.
#[derive(Debug, Clone, Default)]
pub struct StaticAppRegistry {
    packages: HashMap<String, String>,
}

impl StaticAppRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in table.
    pub fn builtin() -> Self {
        BUILTIN_APPS
            .iter()
            .fold(Self::new(), |registry, (name, package)| {
                registry.with_app(*name, *package)
            })
    }

    /// Add or replace an entry.
    pub fn with_app(mut self, name: impl Into<String>, package: impl Into<String>) -> Self {
        self.packages.insert(name.into(), package.into());
        self
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl AppRegistry for StaticAppRegistry {
    fn resolve(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if let Some(package) = self.packages.get(name) {
            return Some(package.as_str());
        }
        let folded = normalize_name(name);
        self.packages
            .iter()
            .find(|(known, _)| normalize_name(known) == folded)
            .map(|(_, package)| package.as_str())
    }

    fn name_for_package(&self, package: &str) -> Option<&str> {
        // Several names can share a package; pick the first alphabetically
        // so the answer is stable.
        self.packages
            .iter()
            .filter(|(_, p)| p.as_str() == package)
            .map(|(name, _)| name.as_str())
            .min()
    }

    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.packages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Lowercase and drop separators so "Android-System-Settings" matches
/// "Android System Settings".
fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin() {
        let registry = StaticAppRegistry::builtin();
        assert_eq!(registry.resolve("微信"), Some("com.tencent.mm"));
        assert_eq!(registry.resolve("Chrome"), Some("com.android.chrome"));
        assert_eq!(registry.resolve("NonExistent"), None);
    }

    #[test]
    fn test_resolve_ignores_case_and_separators() {
        let registry = StaticAppRegistry::builtin();
        assert_eq!(registry.resolve("chrome"), Some("com.android.chrome"));
        assert_eq!(registry.resolve(" keep "), Some("com.gotokeep.keep"));
        assert_eq!(
            registry.resolve("Android-System-Settings"),
            Some("com.android.settings")
        );
    }

    #[test]
    fn test_name_for_package_is_stable() {
        let registry = StaticAppRegistry::builtin();
        assert_eq!(registry.name_for_package("com.MobileTicket"), Some("12306"));
        assert_eq!(registry.name_for_package("com.unknown"), None);
    }

    #[test]
    fn test_custom_entries() {
        let registry = StaticAppRegistry::new().with_app("Notes", "org.example.notes");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("notes"), Some("org.example.notes"));
        assert_eq!(registry.names(), vec!["Notes"]);
        assert!(DEFAULT_APPS.len() > 50);
    }
}
