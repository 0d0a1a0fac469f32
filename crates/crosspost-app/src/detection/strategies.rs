//! Individual detection strategies
//!
//! Each strategy answers with a [`Detection`]; only [`check_cookies`] has a
//! richer answer because cookie presence is provisional.

use std::time::Duration;

use base64::Engine;
use serde_json::Value;

use crosspost_core::prelude::*;
use crosspost_core::{
    ApiProbe, CookieProbe, Detection, DetectionResult, ResponseKind, ScrapeProbe, SurfaceProbe,
};
use crosspost_host::{cookie_header, Cookie, HostSurface, HttpFetcher, HttpRequest, HttpResponse};

use super::predicate::{any_match, evaluate, extract_profile, first_capture, normalize_url};

/// Outcome of a cookie probe
#[derive(Debug, Clone, PartialEq)]
pub enum CookieCheck {
    /// None of the named cookies exist
    Absent,
    /// At least one exists; `username` comes from the username cookie
    Present { username: Option<String> },
}

pub async fn check_cookies<H: HostSurface + Sync>(
    host: &H,
    probe: &CookieProbe,
) -> Result<CookieCheck> {
    let mut found = false;
    for name in &probe.names {
        if host.read_cookie(&probe.url, name).await?.is_some_and(|v| !v.is_empty()) {
            found = true;
            break;
        }
    }
    if !found {
        return Ok(CookieCheck::Absent);
    }

    let username = match &probe.username_cookie {
        Some(name) => host
            .read_cookie(&probe.url, name)
            .await?
            .map(|raw| percent_decode(&raw))
            .filter(|v| !v.is_empty()),
        None => None,
    };
    Ok(CookieCheck::Present { username })
}

fn percent_decode(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

const COOKIE_TEMPLATE_PREFIX: &str = "{cookie:";

/// Substitute `{cookie:NAME}` placeholders from `cookies`
///
/// Returns `None` when a referenced cookie is missing.
pub fn resolve_cookie_templates(url: &str, cookies: &[Cookie]) -> Option<String> {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(start) = rest.find(COOKIE_TEMPLATE_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + COOKIE_TEMPLATE_PREFIX.len()..];
        let end = after.find('}')?;
        let name = &after[..end];
        let value = cookies.iter().find(|c| c.name == name)?;
        out.push_str(&percent_decode(&value.value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn strip_cookie_templates(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(start) = rest.find(COOKIE_TEMPLATE_PREFIX) {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build a request carrying the host's cookies for `url`
async fn authenticated_request<H: HostSurface + Sync>(
    host: &H,
    url: &str,
    timeout: Duration,
) -> std::result::Result<HttpRequest, String> {
    let jar_url = strip_cookie_templates(url);
    let cookies = host
        .cookies_for(&jar_url)
        .await
        .map_err(|e| format!("cookie jar unavailable: {e}"))?;
    let resolved = resolve_cookie_templates(url, &cookies)
        .ok_or_else(|| "cookie referenced by URL is missing".to_string())?;

    let mut request = HttpRequest::get(resolved).timeout(timeout);
    if !cookies.is_empty() {
        request = request.header("Cookie", cookie_header(&cookies));
    }
    Ok(request)
}

/// Fetch with a hard deadline on top of the fetcher's own timeout
async fn fetch_bounded<F: HttpFetcher + Sync>(
    fetcher: &F,
    request: HttpRequest,
    timeout: Duration,
) -> std::result::Result<HttpResponse, String> {
    let url = request.url.clone();
    match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(Error::timeout(url, timeout).to_string()),
    }
}

fn rejected_final_url(needles: &[String], final_url: &str) -> Option<String> {
    needles
        .iter()
        .find(|needle| final_url.contains(needle.as_str()))
        .cloned()
}

// ---------------------------------------------------------------------------
// AuthenticatedApiCall
// ---------------------------------------------------------------------------

pub async fn call_api<H, F>(
    host: &H,
    fetcher: &F,
    probe: &ApiProbe,
    timeout: Duration,
) -> Detection
where
    H: HostSurface + Sync,
    F: HttpFetcher + Sync,
{
    let mut request = match authenticated_request(host, &probe.url, timeout).await {
        Ok(request) => request,
        Err(reason) => return Detection::inconclusive(reason),
    };
    request.method = probe.method;
    request.body = probe.body.clone();
    request = request
        .header("Accept", "application/json, text/plain, */*")
        .header("Cache-Control", "no-cache");
    if probe.body.is_some() {
        request = request.header("Content-Type", "application/json");
    }
    for (name, value) in &probe.headers {
        request = request.header(name.clone(), value.clone());
    }

    if let Some(cookie) = &probe.bearer_cookie {
        match host.read_cookie(&probe.url, cookie).await {
            Ok(Some(token)) if !token.is_empty() => {
                request = request.header("Authorization", format!("Bearer {}", percent_decode(&token)));
            }
            Ok(_) => return Detection::inconclusive(format!("bearer cookie {cookie} missing")),
            Err(e) => return Detection::inconclusive(e.to_string()),
        }
    }

    let response = match fetch_bounded(fetcher, request, timeout).await {
        Ok(response) => response,
        Err(reason) => return Detection::inconclusive(reason),
    };

    if let Some(needle) = rejected_final_url(&probe.reject_final_url, &response.final_url) {
        debug!("{} redirected to a sign-in page ({})", probe.url, needle);
        return Detection::logged_out();
    }
    if !response.is_success() {
        return Detection::inconclusive(format!("HTTP {}", response.status));
    }

    let body = response.text();
    let json = match probe.response {
        ResponseKind::Json => match serde_json::from_str::<Value>(&body) {
            Ok(json) => json,
            Err(e) => return Detection::inconclusive(format!("invalid JSON: {e}")),
        },
        ResponseKind::Html => Value::Null,
    };

    if evaluate(&probe.login, &json, &body) {
        let profile = extract_profile(&probe.profile, &json, &body);
        Detection::LoggedIn(DetectionResult::logged_in(profile.username, profile.avatar))
    } else {
        Detection::logged_out()
    }
}

// ---------------------------------------------------------------------------
// RenderedSurfaceQuery
// ---------------------------------------------------------------------------

/// Best effort: never asserts a logout
pub async fn query_surface<H: HostSurface + Sync>(
    host: &H,
    probe: &SurfaceProbe,
    timeout: Duration,
) -> Detection {
    let surfaces = match host.query_surfaces(&probe.url_pattern).await {
        Ok(surfaces) => surfaces,
        Err(e) => return Detection::inconclusive(e.to_string()),
    };
    let Some(surface) = surfaces.into_iter().next() else {
        return Detection::inconclusive(format!("no open surface matches {}", probe.url_pattern));
    };

    let value = match tokio::time::timeout(timeout, host.evaluate(&surface, &probe.script)).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => return Detection::inconclusive(e.to_string()),
        Err(_) => {
            return Detection::inconclusive(format!(
                "surface query timed out after {}ms",
                timeout.as_millis()
            ))
        }
    };

    if evaluate(&probe.login, &value, "") {
        let profile = extract_profile(&probe.profile, &value, "");
        Detection::LoggedIn(DetectionResult::logged_in(profile.username, profile.avatar))
    } else {
        Detection::inconclusive("surface reports no user")
    }
}

// ---------------------------------------------------------------------------
// HtmlScrape
// ---------------------------------------------------------------------------

pub async fn scrape_page<H, F>(
    host: &H,
    fetcher: &F,
    probe: &ScrapeProbe,
    timeout: Duration,
) -> Detection
where
    H: HostSurface + Sync,
    F: HttpFetcher + Sync,
{
    let mut request = match authenticated_request(host, &probe.url, timeout).await {
        Ok(request) => request,
        Err(reason) => return Detection::inconclusive(reason),
    };
    request = request.header("Accept", "text/html,application/xhtml+xml");
    for (name, value) in &probe.headers {
        request = request.header(name.clone(), value.clone());
    }

    let response = match fetch_bounded(fetcher, request, timeout).await {
        Ok(response) => response,
        Err(reason) => return Detection::inconclusive(reason),
    };

    if let Some(needle) = rejected_final_url(&probe.reject_final_url, &response.final_url) {
        debug!("{} redirected to a sign-in page ({})", probe.url, needle);
        return Detection::logged_out();
    }
    if !response.is_success() {
        return Detection::inconclusive(format!("HTTP {}", response.status));
    }

    let html = response.text();
    if any_match(&probe.logged_out_markers, &html) {
        return Detection::logged_out();
    }

    let avatar = first_capture(&probe.avatar, &html).map(|a| normalize_url(&a));
    if let Some(username) = first_capture(&probe.username, &html) {
        return Detection::LoggedIn(DetectionResult::logged_in(Some(username), avatar));
    }
    if any_match(&probe.logged_in_markers, &html) {
        return Detection::LoggedIn(DetectionResult::logged_in(None, avatar));
    }
    Detection::inconclusive("page has no user markers")
}

// ---------------------------------------------------------------------------
// Avatar inlining
// ---------------------------------------------------------------------------

/// Replace an avatar URL with a `data:` URL; `None` keeps the original
pub async fn inline_avatar<F: HttpFetcher + Sync>(
    fetcher: &F,
    avatar_url: &str,
    referer: &str,
    timeout: Duration,
) -> Option<String> {
    if avatar_url.starts_with("data:") {
        return None;
    }
    let request = HttpRequest::get(avatar_url)
        .header("Referer", referer)
        .header("Accept", "image/*")
        .timeout(timeout);

    let response = match fetch_bounded(fetcher, request, timeout).await {
        Ok(response) if response.is_success() && !response.body.is_empty() => response,
        Ok(response) => {
            debug!("Avatar fetch for {} returned {}", avatar_url, response.status);
            return None;
        }
        Err(reason) => {
            debug!("Avatar fetch for {} failed: {}", avatar_url, reason);
            return None;
        }
    };

    let mime = response
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or("image/png");
    let encoded = base64::engine::general_purpose::STANDARD.encode(&response.body);
    Some(format!("data:{mime};base64,{encoded}"))
}

/// Scheme and host of `url`, used as the avatar Referer
pub fn origin_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!("{}/", parsed.origin().ascii_serialization()),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_core::{LoginPredicate, ProfileExtractor};
    use crosspost_host::test_utils::{FakeFetcher, FakeHost, FakeResponse, ScriptReply};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn juejin_probe() -> ApiProbe {
        ApiProbe::get(
            "https://api.juejin.cn/user_api/v1/user/get",
            LoginPredicate::all(vec![
                LoginPredicate::equals("err_no", 0),
                LoginPredicate::truthy("data.user_id"),
            ]),
            ProfileExtractor::paths(&["data.user_name"], &["data.avatar_large"]),
        )
    }

    #[tokio::test]
    async fn test_cookies_absent() {
        let host = FakeHost::new();
        let probe = CookieProbe::new("https://sspai.com", &["sspai_jwt_token"]);
        assert_eq!(
            check_cookies(&host, &probe).await.unwrap(),
            CookieCheck::Absent
        );
    }

    #[tokio::test]
    async fn test_cookie_username_is_percent_decoded() {
        let host = FakeHost::new();
        host.cookie(".csdn.net", "UserName", "alice01")
            .cookie(".csdn.net", "UserNick", "%E7%88%B1%E4%B8%BD%E4%B8%9D");
        let probe =
            CookieProbe::new("https://www.csdn.net", &["UserName"]).username_from("UserNick");

        assert_eq!(
            check_cookies(&host, &probe).await.unwrap(),
            CookieCheck::Present {
                username: Some("爱丽丝".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_api_logged_in_sends_cookies() {
        let host = FakeHost::new();
        host.cookie(".juejin.cn", "sessionid", "abc");
        let fetcher = FakeFetcher::new();
        fetcher.json(
            "https://api.juejin.cn/user_api/v1/user/get",
            200,
            json!({"err_no": 0, "data": {"user_id": "9", "user_name": "juejiner", "avatar_large": "https://a/x.png"}}),
        );

        let detection = call_api(&host, &fetcher, &juejin_probe(), TIMEOUT).await;
        let Detection::LoggedIn(result) = detection else {
            panic!("expected login, got {detection:?}");
        };
        assert_eq!(result.username.as_deref(), Some("juejiner"));
        assert_eq!(result.avatar_ref.as_deref(), Some("https://a/x.png"));

        let requests = fetcher.requests();
        assert_eq!(requests[0].header_value("cookie"), Some("sessionid=abc"));
        assert_eq!(requests[0].timeout, Some(TIMEOUT));
    }

    #[tokio::test]
    async fn test_api_predicate_false_is_logged_out() {
        let fetcher = FakeFetcher::new();
        fetcher.json(
            "https://api.juejin.cn/",
            200,
            json!({"err_no": 403, "err_msg": "must login"}),
        );
        let detection = call_api(&FakeHost::new(), &fetcher, &juejin_probe(), TIMEOUT).await;
        assert!(matches!(detection, Detection::LoggedOut(_)));
    }

    #[tokio::test]
    async fn test_api_failures_are_inconclusive() {
        let host = FakeHost::new();

        let fetcher = FakeFetcher::new();
        fetcher.json("https://api.juejin.cn/", 502, json!({}));
        assert!(!call_api(&host, &fetcher, &juejin_probe(), TIMEOUT)
            .await
            .is_definitive());

        let fetcher = FakeFetcher::new();
        fetcher.html("https://api.juejin.cn/", "<html>not json</html>");
        assert!(!call_api(&host, &fetcher, &juejin_probe(), TIMEOUT)
            .await
            .is_definitive());

        let fetcher = FakeFetcher::new();
        fetcher.fail("https://api.juejin.cn/", "connection reset");
        assert!(!call_api(&host, &fetcher, &juejin_probe(), TIMEOUT)
            .await
            .is_definitive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_hang_times_out() {
        let fetcher = FakeFetcher::new();
        fetcher.hang("https://api.juejin.cn/");
        let detection = call_api(
            &FakeHost::new(),
            &fetcher,
            &juejin_probe(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(detection, Detection::Inconclusive { .. }));
    }

    #[tokio::test]
    async fn test_api_bearer_cookie() {
        let host = FakeHost::new();
        host.cookie("sspai.com", "sspai_jwt_token", "tok123");
        let fetcher = FakeFetcher::new();
        fetcher.json(
            "https://sspai.com/api/v1/user/info/get",
            200,
            json!({"error": 0, "data": {"nickname": "pai"}}),
        );
        let probe = ApiProbe::get(
            "https://sspai.com/api/v1/user/info/get",
            LoginPredicate::all(vec![
                LoginPredicate::equals("error", 0),
                LoginPredicate::truthy("data.nickname"),
            ]),
            ProfileExtractor::paths(&["data.nickname"], &[]),
        )
        .bearer_cookie("sspai_jwt_token");

        let detection = call_api(&host, &fetcher, &probe, TIMEOUT).await;
        assert!(matches!(detection, Detection::LoggedIn(_)));
        assert_eq!(
            fetcher.requests()[0].header_value("authorization"),
            Some("Bearer tok123")
        );
    }

    #[tokio::test]
    async fn test_api_post_body_and_headers() {
        let fetcher = FakeFetcher::new();
        fetcher.json(
            "https://www.infoq.cn/public/v1/user/get_user",
            200,
            json!({"code": 0, "data": {"uid": 5, "nickname": "q"}}),
        );
        let probe = ApiProbe::get(
            "https://www.infoq.cn/public/v1/user/get_user",
            LoginPredicate::truthy("data.uid"),
            ProfileExtractor::paths(&["data.nickname"], &[]),
        )
        .post("{}")
        .header("Referer", "https://www.infoq.cn/");

        call_api(&FakeHost::new(), &fetcher, &probe, TIMEOUT).await;
        let request = &fetcher.requests()[0];
        assert_eq!(request.method, crosspost_core::HttpMethod::Post);
        assert_eq!(request.body.as_deref(), Some("{}"));
        assert_eq!(request.header_value("referer"), Some("https://www.infoq.cn/"));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_surface_query() {
        let host = FakeHost::new();
        let fetcher_free_probe = SurfaceProbe {
            url_pattern: "https://mp.weixin.qq.com/*".to_string(),
            script: "window.wx.data".to_string(),
            login: LoginPredicate::truthy("nick_name"),
            profile: ProfileExtractor::paths(&["nick_name"], &["head_img"]),
        };

        // No surface open
        assert!(!query_surface(&host, &fetcher_free_probe, TIMEOUT)
            .await
            .is_definitive());

        host.add_surface("https://mp.weixin.qq.com/cgi-bin/home");
        host.on_script(
            "window.wx.data",
            ScriptReply::value(json!({"nick_name": "公众号", "head_img": "//img/h.png"})),
        );
        let Detection::LoggedIn(result) = query_surface(&host, &fetcher_free_probe, TIMEOUT).await
        else {
            panic!("expected login");
        };
        assert_eq!(result.username.as_deref(), Some("公众号"));
        assert_eq!(result.avatar_ref.as_deref(), Some("https://img/h.png"));

        // A surface without a user never asserts logout
        host.on_script("window.wx.data", ScriptReply::value(json!({})));
        assert!(!query_surface(&host, &fetcher_free_probe, TIMEOUT)
            .await
            .is_definitive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_query_times_out() {
        let host = FakeHost::new();
        host.add_surface("https://creator.xiaohongshu.com/new/home");
        host.on_script("galaxy", ScriptReply::Hang);
        let probe = SurfaceProbe {
            url_pattern: "https://creator.xiaohongshu.com/*".to_string(),
            script: "fetch('/api/galaxy/user/info')".to_string(),
            login: LoginPredicate::truthy("data.userId"),
            profile: ProfileExtractor::default(),
        };
        let detection = query_surface(&host, &probe, Duration::from_millis(100)).await;
        assert!(matches!(detection, Detection::Inconclusive { .. }));
    }

    fn wechat_scrape() -> ScrapeProbe {
        ScrapeProbe {
            url: "https://mp.weixin.qq.com/".to_string(),
            logged_out_markers: vec!["扫码登录".to_string()],
            username: vec![r#"nick_name\s*[:=]\s*["']([^"']+)["']"#.to_string()],
            avatar: vec![r#"head_img\s*[:=]\s*["']([^"']+)["']"#.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scrape_username_and_escaped_avatar() {
        let fetcher = FakeFetcher::new();
        fetcher.html(
            "https://mp.weixin.qq.com/",
            r#"<script>wx.data = { nick_name: "\x41lice", head_img: "https:\/\/mmbiz.qpic.cn\/a.png" };</script>"#,
        );
        let Detection::LoggedIn(result) =
            scrape_page(&FakeHost::new(), &fetcher, &wechat_scrape(), TIMEOUT).await
        else {
            panic!("expected login");
        };
        assert_eq!(result.username.as_deref(), Some("Alice"));
        assert_eq!(
            result.avatar_ref.as_deref(),
            Some("https://mmbiz.qpic.cn/a.png")
        );
    }

    #[tokio::test]
    async fn test_scrape_logged_out_marker() {
        let fetcher = FakeFetcher::new();
        fetcher.html("https://mp.weixin.qq.com/", "<div>请使用微信扫码登录</div>");
        let detection = scrape_page(&FakeHost::new(), &fetcher, &wechat_scrape(), TIMEOUT).await;
        assert!(matches!(detection, Detection::LoggedOut(_)));
    }

    #[tokio::test]
    async fn test_scrape_rejected_final_url() {
        let fetcher = FakeFetcher::new();
        fetcher.redirect_html(
            "https://medium.com/me/stats",
            "https://medium.com/m/signin?redirect=stats",
            "<html></html>",
        );
        let probe = ScrapeProbe {
            url: "https://medium.com/me/stats".to_string(),
            reject_final_url: vec!["/m/signin".to_string()],
            username: vec![r#""username"\s*:\s*"([^"]+)""#.to_string()],
            ..Default::default()
        };
        let detection = scrape_page(&FakeHost::new(), &fetcher, &probe, TIMEOUT).await;
        assert!(matches!(detection, Detection::LoggedOut(_)));
    }

    #[tokio::test]
    async fn test_scrape_without_markers_is_inconclusive() {
        let fetcher = FakeFetcher::new();
        fetcher.html("https://mp.weixin.qq.com/", "<html>maintenance</html>");
        let detection = scrape_page(&FakeHost::new(), &fetcher, &wechat_scrape(), TIMEOUT).await;
        assert!(!detection.is_definitive());
    }

    #[tokio::test]
    async fn test_scrape_cookie_template_url() {
        let host = FakeHost::new();
        host.cookie(".csdn.net", "UserName", "alice01");
        let fetcher = FakeFetcher::new();
        fetcher.html(
            "https://blog.csdn.net/alice01",
            "<title>Alice的博客_CSDN博客</title>",
        );
        let probe = ScrapeProbe {
            url: "https://blog.csdn.net/{cookie:UserName}".to_string(),
            username: vec![r"<title>([^<]+?)的博客".to_string()],
            ..Default::default()
        };

        let Detection::LoggedIn(result) = scrape_page(&host, &fetcher, &probe, TIMEOUT).await
        else {
            panic!("expected login");
        };
        assert_eq!(result.username.as_deref(), Some("Alice"));
        assert_eq!(fetcher.requests()[0].url, "https://blog.csdn.net/alice01");

        host.clear_cookies();
        assert!(!scrape_page(&host, &fetcher, &probe, TIMEOUT)
            .await
            .is_definitive());
    }

    #[tokio::test]
    async fn test_inline_avatar() {
        let fetcher = FakeFetcher::new();
        fetcher.bytes("https://img.example/a.png", "image/png; charset=binary", b"PNG");
        let inlined = inline_avatar(
            &fetcher,
            "https://img.example/a.png",
            "https://juejin.cn/",
            TIMEOUT,
        )
        .await;
        assert_eq!(inlined.as_deref(), Some("data:image/png;base64,UE5H"));
        assert_eq!(
            fetcher.requests()[0].header_value("referer"),
            Some("https://juejin.cn/")
        );

        fetcher.route(
            "https://img.example/missing.png",
            FakeResponse::Fail("404".to_string()),
        );
        assert!(inline_avatar(&fetcher, "https://img.example/missing.png", "x", TIMEOUT)
            .await
            .is_none());
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://editor.csdn.net/md/?x=1"),
            "https://editor.csdn.net/"
        );
    }

    #[test]
    fn test_resolve_cookie_templates() {
        let cookies = vec![Cookie::new("id", "42", "a.com")];
        assert_eq!(
            resolve_cookie_templates("https://a.com/u/{cookie:id}/x", &cookies).as_deref(),
            Some("https://a.com/u/42/x")
        );
        assert_eq!(
            resolve_cookie_templates("https://a.com/{cookie:nope}", &cookies),
            None
        );
        assert_eq!(
            strip_cookie_templates("https://a.com/{cookie:id}"),
            "https://a.com/"
        );
    }
}
