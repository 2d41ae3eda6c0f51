mod utils;

use proc_macro::{Delimiter, TokenStream, TokenTree};

/// Builder settings a test may override, as `name = value` pairs.
const OPTIONS: [&str; 3] = ["workers", "queue_order", "fairness_quantum"];

fn compile_error(message: &str) -> TokenStream {
    format!("compile_error!({message:?});")
        .parse()
        .unwrap_or_default()
}

/// Runs an async test body as a task on a fresh scheduler.
///
/// ```rust,ignore
/// #[spindle::test(workers = 2)]
/// async fn sleeps(cx: Ctx) {
///     cx.sleep(10).await;
/// }
/// ```
///
/// The body may use `?` on task errors. The test fails if the scheduler
/// reports a non-zero status or the task fails; a panic inside the task is
/// resumed in the test thread.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut tokens = item.into_iter().collect::<Vec<_>>();

    if let Some(pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        tokens.remove(pos);
    }

    let Some(fn_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))
    else {
        return compile_error("#[spindle::test] expects a function");
    };

    let Some(params) = tokens[fn_pos..].iter().find_map(|t| match t {
        TokenTree::Group(g) if g.delimiter() == Delimiter::Parenthesis => Some(g.stream()),
        _ => None,
    }) else {
        return compile_error("#[spindle::test] expects a parameter list");
    };

    let Some(TokenTree::Group(body)) = tokens
        .iter()
        .rfind(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return compile_error("#[spindle::test] expects a function body");
    };

    let pattern = params
        .into_iter()
        .take_while(|t| !matches!(t, TokenTree::Punct(p) if p.as_char() == ':'))
        .collect::<Vec<_>>();
    let pattern = match utils::tokens_to_string(&pattern) {
        p if p.trim().is_empty() => "_cx".to_owned(),
        p => p,
    };

    let mut builder = String::from("::spindle::SchedulerBuilder::new()");

    for arg in utils::split_args(attr) {
        let (Some(TokenTree::Ident(name)), Some(value)) = (arg.first(), arg.last()) else {
            return compile_error("expected `name = value`");
        };

        let name = name.to_string();
        if !OPTIONS.contains(&name.as_str()) {
            return compile_error(&format!("unknown #[spindle::test] option `{name}`"));
        }

        builder.push_str(&format!(".{name}({value})"));
    }

    let head = utils::tokens_to_string(&tokens[..=fn_pos + 1]);

    let output = format!(
        "#[test]
        {head}() {{
            let mut scheduler = {builder}
                .build()
                .expect(\"failed to build the test scheduler\");

            let handle = scheduler.spawn(move |{pattern}: ::spindle::Ctx| async move {{
                {{ {body} }};
                ::core::result::Result::<i64, ::spindle::TaskError>::Ok(0)
            }});

            assert_eq!(scheduler.run(), 0, \"scheduler stopped with an error\");

            match handle.take_result() {{
                ::core::option::Option::Some(::core::result::Result::Ok(_)) => {{}}
                ::core::option::Option::Some(::core::result::Result::Err(err)) => {{
                    panic!(\"test task failed: {{}}\", err.rethrow())
                }}
                ::core::option::Option::None => {{
                    panic!(\"test task did not finish: {{:?}}\", handle.status())
                }}
            }}
        }}",
        body = body.stream(),
    );

    output
        .parse()
        .unwrap_or_else(|err| compile_error(&format!("#[spindle::test] macro error: {err}")))
}
