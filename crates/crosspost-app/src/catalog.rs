//! Built-in platform catalog
//!
//! Every platform is plain data: detection chain, entry URL, editor
//! selectors and the steps needed before content can be injected.

use crosspost_core::{
    ApiCall, ApiProbe, BodyFormat, CookieProbe, DetectionPlan, DetectionStrategy, EditorTargets,
    HttpMethod, LoginPredicate, PlatformDescriptor, PolicyStep, ProfileExtractor,
    ReadinessSignal, ScrapeProbe, SurfaceProbe, SyncPlan, SyncStrategy,
};

/// Descriptors in registration order
pub fn builtin_descriptors() -> Vec<PlatformDescriptor> {
    vec![
        csdn(),
        juejin(),
        wechat(),
        zhihu(),
        toutiao(),
        segmentfault(),
        cnblogs(),
        oschina(),
        cto51(),
        infoq(),
        jianshu(),
        baijiahao(),
        wangyihao(),
        tencentcloud(),
        medium(),
        sspai(),
        sohu(),
        bilibili(),
        weibo(),
        aliyun(),
        huaweicloud(),
        huaweidev(),
        twitter(),
        qianfan(),
        modelscope(),
        volcengine(),
        xiaohongshu(),
        elecfans(),
        douyin(),
    ]
}

const TITLE_PLACEHOLDER_INPUT: &str = r#"input[placeholder*="标题"]"#;
const TITLE_PLACEHOLDER_TEXTAREA: &str = r#"textarea[placeholder*="标题"]"#;
const CONTENTEDITABLE: &str = r#"[contenteditable="true"]"#;

fn platform(
    id: &str,
    display_name: &str,
    entry_url: &str,
    detection: DetectionPlan,
    sync: SyncPlan,
) -> PlatformDescriptor {
    PlatformDescriptor {
        id: id.to_string(),
        display_name: display_name.to_string(),
        entry_url: entry_url.to_string(),
        detection,
        sync,
    }
}

/// Cache lookup confirmed by the chain's first cookie step
fn cached() -> DetectionStrategy {
    DetectionStrategy::CacheLookup { liveness: None }
}

/// Cache lookup confirmed by a session cookie the chain never checks itself
fn cached_while(url: &str, names: &[&str]) -> DetectionStrategy {
    DetectionStrategy::CacheLookup {
        liveness: Some(CookieProbe::new(url, names)),
    }
}

fn cookies(url: &str, names: &[&str]) -> DetectionStrategy {
    DetectionStrategy::CookiePresence(CookieProbe::new(url, names))
}

fn api(probe: ApiProbe) -> DetectionStrategy {
    DetectionStrategy::AuthenticatedApiCall(probe)
}

fn scrape(probe: ScrapeProbe) -> DetectionStrategy {
    DetectionStrategy::HtmlScrape(probe)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn native(title: Option<&str>, body: &str) -> SyncStrategy {
    SyncStrategy::NativeValueSet {
        targets: EditorTargets::new(title, body),
        format: BodyFormat::Markdown,
    }
}

fn paste(title: Option<&str>, body: &str) -> SyncStrategy {
    SyncStrategy::ClipboardPasteSimulation {
        targets: EditorTargets::new(title, body),
    }
}

// ─────────────────────────────────────────────────────────────────
// Markdown editors
// ─────────────────────────────────────────────────────────────────

fn csdn() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        DetectionStrategy::CookiePresence(
            CookieProbe::new("https://www.csdn.net", &["UserName"]).username_from("UserNick"),
        ),
        scrape(ScrapeProbe {
            url: "https://blog.csdn.net/{cookie:UserName}".to_string(),
            username: strings(&[r"<title>([^<]+?)的博客"]),
            avatar: strings(&[
                r#"<img[^>]*src=["'](https://(?:profile|i-avatar)\.csdnimg\.cn/[^"']+)["']"#,
                r#"<img[^>]*class=["']avatar[^"']*["'][^>]*src=["']([^"']+)["']"#,
            ]),
            ..Default::default()
        }),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        native(
            Some(".article-bar__title input, input[placeholder*=\"标题\"]"),
            ".editor__inner, [contenteditable=\"true\"]",
        ),
        ReadinessSignal::selector(".editor__inner, [contenteditable=\"true\"]"),
    );

    platform("csdn", "CSDN", "https://editor.csdn.net/md/", detection, sync)
}

fn juejin() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://juejin.cn", &["sessionid"]),
        api(ApiProbe::get(
            "https://api.juejin.cn/user_api/v1/user/get",
            LoginPredicate::all(vec![
                LoginPredicate::equals("err_no", 0),
                LoginPredicate::truthy("data.user_id"),
            ]),
            ProfileExtractor::paths(&["data.user_name"], &["data.avatar_large"]),
        )),
    ]);

    let sync = SyncPlan::new(
        native(Some("input.title-input"), ".CodeMirror"),
        ReadinessSignal::selector(".CodeMirror"),
    );

    platform(
        "juejin",
        "掘金",
        "https://juejin.cn/editor/drafts/new",
        detection,
        sync,
    )
}

fn segmentfault() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://segmentfault.com", &["PHPSESSID"]),
        scrape(ScrapeProbe {
            url: "https://segmentfault.com/".to_string(),
            logged_out_markers: strings(&[r#""sessionUser":null"#]),
            username: strings(&[r#""sessionUser"\s*:\s*\{[^}]*?"name"\s*:\s*"([^"]+)""#]),
            avatar: strings(&[r#""sessionUser"\s*:\s*\{[^}]*?"avatar(?:_url)?"\s*:\s*"([^"]+)""#]),
            ..Default::default()
        }),
    ]);

    let sync = SyncPlan::new(
        native(
            Some("input#title, input[placeholder*=\"标题\"]"),
            ".CodeMirror, textarea",
        ),
        ReadinessSignal::selector(".CodeMirror, textarea"),
    );

    platform(
        "segmentfault",
        "思否",
        "https://segmentfault.com/write",
        detection,
        sync,
    )
}

fn cnblogs() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.cnblogs.com", &[".Cnblogs.AspNetCore.Cookies", ".CNBlogsCookie"]),
        api(ApiProbe::get(
            "https://account.cnblogs.com/user/userinfo",
            LoginPredicate::truthy("spaceUserId"),
            ProfileExtractor::paths(&["displayName"], &["iconName"]),
        )),
    ]);

    let sync = SyncPlan::new(
        native(Some("input[placeholder=\"标题\"]"), "#md-editor"),
        ReadinessSignal::selector("#md-editor"),
    );

    platform(
        "cnblogs",
        "博客园",
        "https://i.cnblogs.com/posts/edit",
        detection,
        sync,
    )
}

fn oschina() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.oschina.net", &["oscid"]),
        scrape(ScrapeProbe {
            url: "https://www.oschina.net/".to_string(),
            logged_in_markers: strings(&[r"my\.oschina\.net/u/\d+", r"space\.oschina\.net/u/\d+"]),
            username: strings(&[
                r#"<a[^>]*class="[^"]*user-name[^"]*"[^>]*>([^<]+)</a>"#,
                r#"<span[^>]*class="[^"]*nick[^"]*"[^>]*>([^<]+)</span>"#,
                r#"title="([^"]+)"[^>]*class="[^"]*avatar"#,
            ]),
            avatar: strings(&[r#"<img[^>]*class="[^"]*avatar[^"]*"[^>]*src="([^"]+)""#]),
            ..Default::default()
        }),
    ]);

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), "textarea"),
        ReadinessSignal::selector(".editor-switch-text, textarea"),
    )
    .steps(vec![
        PolicyStep::click(".editor-switch-btn, .editor-switch-text", Some("切换到MD编辑器")),
        PolicyStep::confirm(
            ".ant-modal, .el-dialog, [role=\"dialog\"]",
            &["确定切换", "确定"],
        ),
        PolicyStep::wait_for("textarea"),
    ]);

    platform(
        "oschina",
        "开源中国",
        "https://my.oschina.net/blog/ai-write",
        detection,
        sync,
    )
}

fn cto51() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://blog.51cto.com", &["_identity"]),
        scrape(ScrapeProbe {
            url: "https://blog.51cto.com/blogger/publish".to_string(),
            reject_final_url: strings(&["home.51cto.com", "/login"]),
            logged_in_markers: strings(&[r"blog\.51cto\.com/\d{5,}"]),
            avatar: strings(&[
                r#"<img[^>]*data-uid=["']\d+["'][^>]*src=["'](https?://[^"']+)["']"#,
                r#"<img[^>]*src=["'](https://s[0-9]*\.51cto\.com/oss/[^"']+)["'][^>]*data-uid"#,
            ]),
            ..Default::default()
        }),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        native(Some("#title"), "[contenteditable=\"true\"], .CodeMirror"),
        ReadinessSignal::selector("#title"),
    );

    platform(
        "cto51",
        "51CTO",
        "https://blog.51cto.com/blogger/publish",
        detection,
        sync,
    )
}

fn infoq() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.infoq.cn", &["GCESS"]),
        api(ApiProbe::get(
            "https://www.infoq.cn/public/v1/user/get_user",
            LoginPredicate::all(vec![
                LoginPredicate::equals("code", 0),
                LoginPredicate::truthy("data.uid"),
            ]),
            ProfileExtractor::paths(&["data.nickname"], &["data.avatar"]),
        )
        .post("{}")),
    ]);

    let create = ApiCall {
        url: "https://xie.infoq.cn/api/v1/draft/create".to_string(),
        method: HttpMethod::Post,
        body: Some("{}".to_string()),
        captures: vec![("draft_id".to_string(), "data.id".to_string())],
        require: Some(LoginPredicate::all(vec![
            LoginPredicate::equals("code", 0),
            LoginPredicate::truthy("data.id"),
        ])),
    };

    let sync = SyncPlan::new(
        SyncStrategy::StructuredApiCreate {
            calls: vec![create],
            edit_url: "https://xie.infoq.cn/draft/{draft_id}".to_string(),
            then: Box::new(native(
                Some("input.draft-title, input[placeholder*=\"标题\"]"),
                ".ProseMirror, [contenteditable=\"true\"]",
            )),
        },
        ReadinessSignal::selector(".ProseMirror, [contenteditable=\"true\"]"),
    );

    platform("infoq", "InfoQ", "https://xie.infoq.cn/", detection, sync)
}

fn jianshu() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.jianshu.com", &["remember_user_token"]),
        api(ApiProbe::get(
            "https://www.jianshu.com/settings/basic.json",
            LoginPredicate::truthy("data"),
            ProfileExtractor::paths(&["data.nickname"], &["data.avatar"]),
        )),
    ]);

    let notebooks = ApiCall {
        url: "https://www.jianshu.com/author/notebooks".to_string(),
        method: HttpMethod::Get,
        body: None,
        captures: vec![("notebook_id".to_string(), "0.id".to_string())],
        require: Some(LoginPredicate::truthy("0.id")),
    };
    let note = ApiCall {
        url: "https://www.jianshu.com/author/notes".to_string(),
        method: HttpMethod::Post,
        body: Some(
            r#"{"notebook_id":"{notebook_id}","title":"{title}","at_bottom":false}"#.to_string(),
        ),
        captures: vec![("note_id".to_string(), "id".to_string())],
        require: Some(LoginPredicate::truthy("id")),
    };

    let sync = SyncPlan::new(
        SyncStrategy::StructuredApiCreate {
            calls: vec![notebooks, note],
            edit_url: "https://www.jianshu.com/writer#/notebooks/{notebook_id}/notes/{note_id}"
                .to_string(),
            then: Box::new(native(
                Some("input._24i7u, input[class*=\"title\"]"),
                "#arthur-editor",
            )),
        },
        ReadinessSignal::selector("#arthur-editor"),
    );

    platform(
        "jianshu",
        "简书",
        "https://www.jianshu.com/writer#/",
        detection,
        sync,
    )
}

fn tencentcloud() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://cloud.tencent.com", &["uin", "skey"]),
        scrape(ScrapeProbe {
            url: "https://cloud.tencent.com/developer/creator".to_string(),
            logged_out_markers: strings(&["登录/注册", r#""isLogin":false"#]),
            logged_in_markers: strings(&["创作中心", "我的文章"]),
            username: strings(&[
                r#""nickname"\s*:\s*"([^"]+)""#,
                r#""nickName"\s*:\s*"([^"]+)""#,
            ]),
            avatar: strings(&[r#""avatarUrl"\s*:\s*"([^"]+)""#, r#""avatar"\s*:\s*"([^"]+)""#]),
            ..Default::default()
        }),
    ]);

    let sync = SyncPlan::new(
        native(Some("textarea.article-title, textarea[placeholder*=\"标题\"]"), ".CodeMirror"),
        ReadinessSignal::selector("button, .CodeMirror"),
    )
    .steps(vec![
        PolicyStep::click("button", Some("切换 MD")),
        PolicyStep::wait_for(".CodeMirror"),
    ]);

    platform(
        "tencentcloud",
        "腾讯云开发者社区",
        "https://cloud.tencent.com/developer/article/write",
        detection,
        sync,
    )
}

fn aliyun() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://developer.aliyun.com", &["login_aliyunid_ticket"]),
        api(ApiProbe::get(
            "https://developer.aliyun.com/developer/api/my/user/getUser",
            LoginPredicate::all(vec![
                LoginPredicate::truthy("success"),
                LoginPredicate::truthy("data.nickname"),
            ]),
            ProfileExtractor::paths(&["data.nickname"], &["data.avatar"]),
        )),
    ]);

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), "textarea"),
        ReadinessSignal::selector("textarea"),
    );

    platform(
        "aliyun",
        "阿里云开发者社区",
        "https://developer.aliyun.com/article/new#/",
        detection,
        sync,
    )
}

fn huaweidev() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://developer.huawei.com", &["developer_userinfo"]),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), ".CodeMirror, textarea"),
        ReadinessSignal::selector(TITLE_PLACEHOLDER_INPUT),
    )
    .steps(vec![
        PolicyStep::click("button, span", Some("MD")),
        PolicyStep::confirm(".ant-modal-confirm-btns", &["确认", "确定"]),
        PolicyStep::wait_for(".CodeMirror, textarea"),
    ]);

    platform(
        "huaweidev",
        "华为开发者文章",
        "https://developer.huawei.com/consumer/cn/blog/create",
        detection,
        sync,
    )
}

fn qianfan() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://qianfan.cloud.baidu.com", &["BDUSS"]),
        api(ApiProbe::get(
            "https://qianfan.cloud.baidu.com/api/community/user/current",
            LoginPredicate::all(vec![
                LoginPredicate::truthy("success"),
                LoginPredicate::truthy("result"),
            ]),
            ProfileExtractor::paths(
                &["result.displayName", "result.nickname"],
                &["result.avatar"],
            ),
        )),
    ]);

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), ".CodeMirror, textarea"),
        ReadinessSignal::selector(".CodeMirror, textarea"),
    );

    platform(
        "qianfan",
        "百度千帆",
        "https://qianfan.cloud.baidu.com/qianfandev/topic/create",
        detection,
        sync,
    )
}

fn elecfans() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://www.elecfans.com", &["auth", "auth_www"]),
        api(ApiProbe::get(
            "https://www.elecfans.com/webapi/passport/checklogin",
            LoginPredicate::truthy("uid"),
            ProfileExtractor::paths(&["username"], &["avatar"]),
        )),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        native(
            Some(TITLE_PLACEHOLDER_INPUT),
            ".vditor-wysiwyg .vditor-reset, .CodeMirror",
        ),
        ReadinessSignal::selector(".vditor-wysiwyg .vditor-reset, .CodeMirror"),
    );

    platform(
        "elecfans",
        "电子发烧友",
        "https://www.elecfans.com/d/article/md/",
        detection,
        sync,
    )
}

fn huaweicloud() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://bbs.huaweicloud.com", &["ua", "SessionID"]),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), ".CodeMirror, textarea"),
        ReadinessSignal::selector(TITLE_PLACEHOLDER_INPUT),
    )
    .steps(vec![
        PolicyStep::click("span, div, a, button", Some("Markdown格式编辑")),
        PolicyStep::confirm(".el-message-box, .ant-modal, [role=\"dialog\"]", &["确定"]),
        PolicyStep::delay(3_000),
        PolicyStep::wait_for(".CodeMirror, textarea"),
    ]);

    platform(
        "huaweicloud",
        "华为云开发者博客",
        "https://bbs.huaweicloud.com/blogs/article",
        detection,
        sync,
    )
}

fn modelscope() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://modelscope.cn", &["m_session_id"]),
        api(ApiProbe::get(
            "https://modelscope.cn/api/v1/users/login/info",
            LoginPredicate::all(vec![
                LoginPredicate::truthy("Success"),
                LoginPredicate::truthy("Data.Name"),
            ]),
            ProfileExtractor::paths(&["Data.NickName", "Data.Name"], &["Data.Avatar"]),
        )),
    ]);

    // Markdown stays in the source textarea; converting it to rich text is left to the user
    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), "textarea"),
        ReadinessSignal::selector(r#"textarea, [data-cangjie-editable="true"]"#),
    );

    platform(
        "modelscope",
        "ModelScope 魔搭社区",
        "https://modelscope.cn/learn/create",
        detection,
        sync,
    )
}

fn volcengine() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://developer.volcengine.com", &["sessionid"]),
        api(ApiProbe::get(
            "https://developer.volcengine.com/api/fe/v1/user",
            LoginPredicate::all(vec![
                LoginPredicate::equals("err_no", 0),
                LoginPredicate::any(vec![
                    LoginPredicate::truthy("data.user_id"),
                    LoginPredicate::truthy("data.name"),
                ]),
            ]),
            ProfileExtractor::paths(&["data.name"], &["data.avatar.url"]),
        )),
    ]);

    let sync = SyncPlan::new(
        native(Some(TITLE_PLACEHOLDER_INPUT), ".CodeMirror, .bytemd-editor textarea"),
        ReadinessSignal::selector(".CodeMirror, .bytemd-editor textarea"),
    );

    platform(
        "volcengine",
        "火山引擎开发者社区",
        "https://developer.volcengine.com/articles/draft",
        detection,
        sync,
    )
}

// ─────────────────────────────────────────────────────────────────
// Rich text editors
// ─────────────────────────────────────────────────────────────────

fn wechat() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://mp.weixin.qq.com", &["slave_sid"]),
        DetectionStrategy::RenderedSurfaceQuery(SurfaceProbe {
            url_pattern: "https://mp.weixin.qq.com/*".to_string(),
            script: "(() => { const d = (window.wx && window.wx.data) || {}; \
                     return { nick_name: d.nick_name || null, head_img: d.head_img || null }; })()"
                .to_string(),
            login: LoginPredicate::truthy("nick_name"),
            profile: ProfileExtractor::paths(&["nick_name"], &["head_img"]),
        }),
        scrape(ScrapeProbe {
            url: "https://mp.weixin.qq.com/".to_string(),
            logged_out_markers: strings(&["请使用微信扫描", "扫码登录"]),
            username: strings(&[r#"nick_name\s*[:=]\s*["']([^"']+)["']"#]),
            avatar: strings(&[r#"head_img\s*[:=]\s*["']([^"']+)["']"#]),
            ..Default::default()
        }),
    ]);

    let sync = SyncPlan::new(
        paste(Some("#title"), ".ProseMirror"),
        ReadinessSignal::selector(".ProseMirror"),
    );

    platform(
        "wechat",
        "微信公众号",
        "https://mp.weixin.qq.com/cgi-bin/appmsg?t=media/appmsg_edit_v2&action=edit&isNew=1&type=10",
        detection,
        sync,
    )
}

fn zhihu() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.zhihu.com", &["z_c0"]),
        api(ApiProbe::get(
            "https://www.zhihu.com/api/v4/me",
            LoginPredicate::truthy("id"),
            ProfileExtractor::paths(&["name"], &["avatar_url"]),
        )),
    ]);

    let sync = SyncPlan::new(
        SyncStrategy::FileImport {
            input: r#"input[type="file"][accept*=".md"]"#.to_string(),
            drop_target: Some(r#"[class*="Modal"]"#.to_string()),
            verify: ".public-DraftEditor-content, [contenteditable=\"true\"]".to_string(),
        },
        ReadinessSignal::selector(r#"textarea[placeholder*="标题"]"#),
    )
    .steps(vec![
        PolicyStep::click("button", Some("导入")),
        PolicyStep::click("button, [role=\"menuitem\"], div", Some("导入文档")),
        PolicyStep::wait_for(r#"input[type="file"][accept*=".md"]"#),
    ]);

    platform(
        "zhihu",
        "知乎",
        "https://zhuanlan.zhihu.com/write",
        detection,
        sync,
    )
}

fn toutiao() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://mp.toutiao.com", &["sessionid"]),
        api(ApiProbe::get(
            "https://mp.toutiao.com/mp/agw/creator_center/user_info?app_id=1231",
            LoginPredicate::all(vec![
                LoginPredicate::equals("code", 0),
                LoginPredicate::truthy("name"),
            ]),
            ProfileExtractor::paths(&["name"], &["avatar_url"]),
        )),
    ]);

    let sync = SyncPlan::new(
        paste(Some(TITLE_PLACEHOLDER_TEXTAREA), ".ProseMirror"),
        ReadinessSignal::selector(".ProseMirror"),
    );

    platform(
        "toutiao",
        "今日头条",
        "https://mp.toutiao.com/profile_v4/graphic/publish",
        detection,
        sync,
    )
}

fn baijiahao() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://baijiahao.baidu.com", &["BDUSS"]),
        api(ApiProbe::get(
            "https://baijiahao.baidu.com/builder/app/appinfo",
            LoginPredicate::all(vec![
                LoginPredicate::equals("errno", 0),
                LoginPredicate::truthy("data.user.name"),
            ]),
            ProfileExtractor::paths(&["data.user.name"], &["data.user.avatar"]),
        )),
    ]);

    let sync = SyncPlan::new(
        paste(
            Some(r#"[class*="titleInput"] [contenteditable="true"], [class*="titleInput"] textarea"#),
            ".ProseMirror, #ueditor_0, [contenteditable=\"true\"]",
        ),
        ReadinessSignal::selector(r#"[class*="titleInput"]"#).settle_ms(2_500),
    );

    platform(
        "baijiahao",
        "百家号",
        "https://baijiahao.baidu.com/builder/rc/edit?type=news",
        detection,
        sync,
    )
}

fn wangyihao() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://mp.163.com", &["NTES_SESS", "S_INFO"]),
        api(ApiProbe::get(
            "https://mp.163.com/wemedia/navinfo.do",
            LoginPredicate::all(vec![
                LoginPredicate::equals("code", 1),
                LoginPredicate::truthy("data.wemediaId"),
            ]),
            ProfileExtractor::paths(&["data.tname"], &["data.icon"]),
        )
        .header("Accept", "application/json")
        .header("Referer", "https://mp.163.com/")),
    ]);

    let sync = SyncPlan::new(
        paste(
            Some(r#"textarea.netease-textarea, textarea[placeholder*="标题"]"#),
            r#".public-DraftEditor-content, [contenteditable="true"]"#,
        ),
        ReadinessSignal::selector(r#".public-DraftEditor-content, [contenteditable="true"]"#),
    );

    platform(
        "wangyihao",
        "网易号",
        "https://mp.163.com/#/article-publish",
        detection,
        sync,
    )
}

fn medium() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://medium.com", &["sid", "uid"]),
        scrape(ScrapeProbe {
            url: "https://medium.com/me/stats".to_string(),
            reject_final_url: strings(&["/m/signin", "?signIn"]),
            username: strings(&[r#""username"\s*:\s*"([^"]+)""#]),
            avatar: strings(&[r#""imageId"\s*:\s*"([^"]+\.(?:png|jpe?g))""#]),
            ..Default::default()
        }),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        paste(Some("h3.graf--title"), "div.section-inner, p.graf--p"),
        ReadinessSignal::selector("h3.graf--title, p.graf--p"),
    );

    platform(
        "medium",
        "Medium",
        "https://medium.com/new-story",
        detection,
        sync,
    )
}

fn sspai() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://sspai.com", &["sspai_jwt_token"]),
        api(ApiProbe::get(
            "https://sspai.com/api/v1/user/info/get",
            LoginPredicate::all(vec![
                LoginPredicate::equals("error", 0),
                LoginPredicate::truthy("data.nickname"),
            ]),
            ProfileExtractor::paths(&["data.nickname"], &["data.avatar"]),
        )
        .bearer_cookie("sspai_jwt_token")),
    ]);

    let sync = SyncPlan::new(
        paste(Some(TITLE_PLACEHOLDER_TEXTAREA), ".ProseMirror"),
        ReadinessSignal::selector(".ProseMirror"),
    );

    platform("sspai", "少数派", "https://sspai.com/write", detection, sync)
}

fn sohu() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://mp.sohu.com", &["ppinf"]),
        api(ApiProbe::get(
            "https://mp.sohu.com/mpbp/bp/account/list",
            LoginPredicate::all(vec![
                LoginPredicate::truthy("success"),
                LoginPredicate::truthy("data.data.0.accounts.0"),
            ]),
            ProfileExtractor::paths(
                &["data.data.0.accounts.0.nickName"],
                &["data.data.0.accounts.0.avatar"],
            ),
        )),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        paste(Some(TITLE_PLACEHOLDER_INPUT), ".ql-editor"),
        ReadinessSignal::selector(".ql-editor"),
    );

    platform(
        "sohu",
        "搜狐号",
        "https://mp.sohu.com/mpfe/v4/contentManagement/news/addarticle?contentStatus=1",
        detection,
        sync,
    )
}

fn bilibili() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://www.bilibili.com", &["SESSDATA"]),
        api(ApiProbe::get(
            "https://api.bilibili.com/x/web-interface/nav",
            LoginPredicate::all(vec![
                LoginPredicate::equals("code", 0),
                LoginPredicate::truthy("data.isLogin"),
            ]),
            ProfileExtractor::paths(&["data.uname"], &["data.face"]),
        )
        .header("Referer", "https://www.bilibili.com/")),
    ]);

    let sync = SyncPlan::new(
        paste(Some(TITLE_PLACEHOLDER_TEXTAREA), ".ql-editor, [contenteditable=\"true\"]"),
        ReadinessSignal::selector(".ql-editor, [contenteditable=\"true\"]").settle_ms(2_000),
    );

    platform(
        "bilibili",
        "哔哩哔哩专栏",
        "https://member.bilibili.com/read/editor/#/web",
        detection,
        sync,
    )
}

fn weibo() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://card.weibo.com", &["SUBP", "ALF"]),
        scrape(ScrapeProbe {
            url: "https://card.weibo.com/article/v5/editor".to_string(),
            reject_final_url: strings(&["passport.weibo.com", "/signin"]),
            username: strings(&[
                r#""nick"\s*:\s*"([^"]+)""#,
                r#"\\"nick\\"\s*:\s*\\"([^\\"]+)\\""#,
            ]),
            avatar: strings(&[
                r#""avatar_large"\s*:\s*"([^"]+)""#,
                r#"\\"avatar_large\\"\s*:\s*\\"([^\\"]+)\\""#,
            ]),
            ..Default::default()
        }),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        paste(Some(TITLE_PLACEHOLDER_TEXTAREA), ".ProseMirror"),
        ReadinessSignal::selector(".ProseMirror"),
    );

    platform(
        "weibo",
        "微博头条文章",
        "https://card.weibo.com/article/v5/editor#/draft",
        detection,
        sync,
    )
}

fn twitter() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached(),
        cookies("https://x.com", &["auth_token"]),
        scrape(ScrapeProbe {
            url: "https://x.com/home".to_string(),
            reject_final_url: strings(&["/login", "/i/flow/login"]),
            username: strings(&[r#""screen_name"\s*:\s*"([^"]+)""#]),
            avatar: strings(&[r#""profile_image_url_https"\s*:\s*"([^"]+)""#]),
            ..Default::default()
        }),
    ])
    .assume_logged_in_with_cookie();

    let sync = SyncPlan::new(
        paste(
            Some(r#"textarea[placeholder="Add a title"]"#),
            r#"[data-testid="composer"] [contenteditable="true"], .public-DraftEditor-content"#,
        ),
        ReadinessSignal::selector(r#"textarea[placeholder="Add a title"]"#),
    )
    .focused();

    platform(
        "twitter",
        "X (Twitter) Articles",
        "https://x.com/compose/articles/edit/",
        detection,
        sync,
    )
}

fn xiaohongshu() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://creator.xiaohongshu.com", &["a1"]),
        DetectionStrategy::RenderedSurfaceQuery(SurfaceProbe {
            url_pattern: "https://creator.xiaohongshu.com/*".to_string(),
            script: "fetch('/api/galaxy/user/info', { credentials: 'include' })\
                     .then(r => r.json())"
                .to_string(),
            login: LoginPredicate::all(vec![
                LoginPredicate::truthy("success"),
                LoginPredicate::equals("code", 0),
                LoginPredicate::truthy("data.userId"),
            ]),
            profile: ProfileExtractor::paths(
                &["data.userName", "data.redId"],
                &["data.userAvatar"],
            ),
        }),
    ])
    .ttl_secs(7 * 24 * 60 * 60);

    let sync = SyncPlan::new(
        paste(
            Some(r#"textarea[placeholder*="标题"], input[placeholder*="标题"]"#),
            CONTENTEDITABLE,
        ),
        ReadinessSignal::selector("button").settle_ms(3_000),
    )
    .steps(vec![
        PolicyStep::click("button", Some("新的创作")),
        PolicyStep::WaitFor {
            selector: CONTENTEDITABLE.to_string(),
            timeout_ms: 10_000,
        },
        PolicyStep::delay(1_000),
    ]);

    platform(
        "xiaohongshu",
        "小红书",
        "https://creator.xiaohongshu.com/publish/publish?from=menu&target=article",
        detection,
        sync,
    )
}

fn douyin() -> PlatformDescriptor {
    let detection = DetectionPlan::new(vec![
        cached_while("https://creator.douyin.com", &["sessionid"]),
        api(ApiProbe::get(
            "https://creator.douyin.com/web/api/media/user/info/",
            LoginPredicate::all(vec![
                LoginPredicate::equals("status_code", 0),
                LoginPredicate::any(vec![
                    LoginPredicate::truthy("user.uid"),
                    LoginPredicate::truthy("user_info.uid"),
                ]),
            ]),
            ProfileExtractor::paths(
                &["user.nickname", "user_info.nickname"],
                &["user.avatar_thumb.url_list.0", "user_info.avatar_thumb.url_list.0"],
            ),
        )),
    ]);

    let sync = SyncPlan::new(
        paste(
            Some(r#"input[placeholder*="标题"], textarea[placeholder*="标题"]"#),
            ".ProseMirror, [contenteditable=\"true\"]",
        ),
        ReadinessSignal::selector(".ProseMirror, [contenteditable=\"true\"]").timeout_ms(20_000),
    );

    platform(
        "douyin",
        "抖音文章",
        "https://creator.douyin.com/creator-micro/content/post/article?default-tab=5&enter_from=publish_page&media_type=article&type=new",
        detection,
        sync,
    )
}
