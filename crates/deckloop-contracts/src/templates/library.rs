use serde_json::json;

use super::{ParamKind, ParamSpec, SlideArgs, TemplateSpec};
use super::registry::ERROR_TEMPLATE;

const FONT_STACK: &str = "Roboto, Arial, sans-serif";

pub fn builtin_templates() -> Vec<TemplateSpec> {
    vec![
        split_title_template(),
        split_section_template(),
        body_bullets_template(),
        body_focus_template(),
        body_gradient_template(),
        conclusion_template(),
        closing_template(),
        error_slide_template(),
    ]
}

fn split_title_template() -> TemplateSpec {
    TemplateSpec::new(
        "split_title",
        "Opening slide: large title and subtitle on the left, an illustration panel on the right.",
        vec![
            ParamSpec::content("title", ParamKind::String, json!("Presentation title"), "Main title text."),
            ParamSpec::content("subtitle", ParamKind::String, json!("A short line describing the talk"), "Subtitle under the title."),
            ParamSpec::content("image_caption", ParamKind::String, json!("Illustration"), "Text shown in the right-hand illustration panel."),
            ParamSpec::style("left_bg_color", ParamKind::String, json!("#F8F8F8"), "Background color of the left section."),
            ParamSpec::style("title_color", ParamKind::String, json!("#2C4B7D"), "Color of the title."),
            ParamSpec::style("subtitle_color", ParamKind::String, json!("#333333"), "Color of the subtitle."),
            ParamSpec::style("dots", ParamKind::String, json!("•••••"), "Decorative symbols under the subtitle."),
            ParamSpec::style("dots_color", ParamKind::String, json!("#2C4B7D"), "Color of the decorative symbols."),
            ParamSpec::style("right_bg_color", ParamKind::String, json!("#F8F8F8"), "Background color of the illustration panel."),
            ParamSpec::style("decor_bg_color", ParamKind::String, json!("#2C4B7D"), "Color of the decorative band along the bottom."),
            ParamSpec::style("title_size_px", ParamKind::Integer, json!(64), "Title font size in pixels.").bounded(24.0, 120.0),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_split_title,
    )
}

fn render_split_title(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: #E0E0E0; position: relative; overflow: hidden; }}
.wrap {{ display: flex; height: 100%; align-items: center; justify-content: center; gap: 6%; position: relative; z-index: 1; }}
.left {{ background: {left_bg}; width: 48%; padding: 60px; box-sizing: border-box; }}
.title {{ font-size: {title_size}px; font-weight: 700; color: {title_color}; margin-bottom: 20px; }}
.subtitle {{ font-size: 28px; color: {subtitle_color}; margin-bottom: 40px; }}
.dots {{ font-size: 36px; color: {dots_color}; }}
.right {{ background: {right_bg}; width: 34%; height: 55%; border-radius: 10px; display: flex; align-items: center; justify-content: center; font-size: 24px; color: #666; }}
.decor {{ position: absolute; left: 0; bottom: 0; width: 100%; height: 30%; background: {decor}; z-index: 0; }}"#,
        font = args.css("font_family"),
        left_bg = args.css("left_bg_color"),
        title_size = args.integer("title_size_px"),
        title_color = args.css("title_color"),
        subtitle_color = args.css("subtitle_color"),
        dots_color = args.css("dots_color"),
        right_bg = args.css("right_bg_color"),
        decor = args.css("decor_bg_color"),
    );
    let body = format!(
        r#"<div class="wrap">
  <div class="left">
    <div class="title">{title}</div>
    <div class="subtitle">{subtitle}</div>
    <div class="dots">{dots}</div>
  </div>
  <div class="right">{caption}</div>
</div>
<div class="decor"></div>"#,
        title = args.text("title"),
        subtitle = args.text("subtitle"),
        dots = args.text("dots"),
        caption = args.text("image_caption"),
    );
    page(args.text("title"), &style, &body)
}

fn split_section_template() -> TemplateSpec {
    TemplateSpec::new(
        "split_section",
        "Section divider: a large section number on a colored column, two image placeholders, and a titled description.",
        vec![
            ParamSpec::content("number", ParamKind::String, json!("01"), "Section number shown in the left column."),
            ParamSpec::content("heading", ParamKind::String, json!("Section"), "Section heading."),
            ParamSpec::content("description", ParamKind::String, json!("What this section covers."), "Short description next to the heading."),
            ParamSpec::content("placeholder_1", ParamKind::String, json!("Image placeholder"), "Text for the first image placeholder."),
            ParamSpec::content("placeholder_2", ParamKind::String, json!("Diagram placeholder"), "Text for the second image placeholder."),
            ParamSpec::style("left_bg_color", ParamKind::String, json!("#2C4B7D"), "Background color of the number column."),
            ParamSpec::style("left_text_color", ParamKind::String, json!("#FFFFFF"), "Color of the section number."),
            ParamSpec::style("right_bg_color", ParamKind::String, json!("#F0F0F0"), "Background color of the content area."),
            ParamSpec::style("heading_color", ParamKind::String, json!("#2C4B7D"), "Color of the heading."),
            ParamSpec::style("description_color", ParamKind::String, json!("#333333"), "Color of the description."),
            ParamSpec::style("divider_color", ParamKind::String, json!("#000000"), "Color of the divider between heading and description."),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_split_section,
    )
}

fn render_split_section(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {right_bg}; display: flex; }}
.left {{ width: 33%; background: {left_bg}; color: {left_text}; display: flex; justify-content: center; }}
.number {{ font-size: 160px; font-weight: 700; margin-top: 100px; }}
.right {{ flex: 1; display: flex; flex-direction: column; justify-content: space-evenly; padding: 40px; }}
.images {{ display: flex; gap: 24px; }}
.placeholder {{ flex: 1; height: 260px; background: #CCCCCC; border: 1px solid #000; display: flex; align-items: center; justify-content: center; font-size: 22px; }}
.bottom {{ background: #FFFFFF; margin-left: -20%; padding: 50px; display: flex; align-items: center; gap: 30px; }}
.heading {{ font-size: 64px; font-weight: 700; color: {heading_color}; }}
.divider {{ width: 2px; height: 100px; background: {divider}; }}
.description {{ font-size: 22px; line-height: 1.6; color: {description_color}; max-width: 55%; }}"#,
        font = args.css("font_family"),
        right_bg = args.css("right_bg_color"),
        left_bg = args.css("left_bg_color"),
        left_text = args.css("left_text_color"),
        heading_color = args.css("heading_color"),
        divider = args.css("divider_color"),
        description_color = args.css("description_color"),
    );
    let body = format!(
        r#"<div class="left"><div class="number">{number}</div></div>
<div class="right">
  <div class="images">
    <div class="placeholder">{first}</div>
    <div class="placeholder">{second}</div>
  </div>
  <div class="bottom">
    <div class="heading">{heading}</div>
    <div class="divider"></div>
    <div class="description">{description}</div>
  </div>
</div>"#,
        number = args.text("number"),
        first = args.text("placeholder_1"),
        second = args.text("placeholder_2"),
        heading = args.text("heading"),
        description = args.text("description"),
    );
    page(args.text("heading"), &style, &body)
}

fn body_bullets_template() -> TemplateSpec {
    TemplateSpec::new(
        "body_bullets",
        "Body slide: title, an introductory sentence and a bullet list, with an image placeholder beside the text.",
        vec![
            ParamSpec::content("slide_title", ParamKind::String, json!("Key points"), "Title displayed on the slide."),
            ParamSpec::content("intro", ParamKind::String, json!("This section covers:"), "Sentence introducing the list."),
            ParamSpec::content("items", ParamKind::StringList, json!(["First point", "Second point", "Third point"]), "Bullet points; inline <span class=\"keyword\"> markup is allowed."),
            ParamSpec::content("image_caption", ParamKind::String, json!("Image placeholder"), "Text for the image placeholder."),
            ParamSpec::style("bg_color", ParamKind::String, json!("#E9F7FE"), "Page background color."),
            ParamSpec::style("text_bg_color", ParamKind::String, json!("#FFFFFF"), "Background color of the text card."),
            ParamSpec::style("text_color", ParamKind::String, json!("#2E4E7E"), "Body text color."),
            ParamSpec::style("accent_color", ParamKind::String, json!("#004080"), "Color of the title and keywords."),
            ParamSpec::style("image_bg_color", ParamKind::String, json!("#B0D4F1"), "Background color of the image placeholder."),
            ParamSpec::style("show_image", ParamKind::Boolean, json!(true), "Whether the image placeholder is shown."),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_body_bullets,
    )
}

fn render_body_bullets(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {bg}; display: flex; flex-direction: column; align-items: center; justify-content: center; }}
.slide-title {{ color: {accent}; font-size: 56px; font-weight: 800; margin-bottom: 24px; }}
.card {{ display: flex; gap: 40px; background: {text_bg}; border-radius: 12px; padding: 48px; width: 80%; box-shadow: 0 4px 8px rgba(0, 0, 0, 0.1); }}
.text {{ flex: 2; color: {text}; font-size: 26px; line-height: 1.5; }}
.keyword {{ color: {accent}; font-weight: 700; }}
.image {{ flex: 1; background: {image_bg}; border-radius: 8px; min-height: 320px; display: flex; align-items: center; justify-content: center; color: #333; }}"#,
        font = args.css("font_family"),
        bg = args.css("bg_color"),
        accent = args.css("accent_color"),
        text_bg = args.css("text_bg_color"),
        text = args.css("text_color"),
        image_bg = args.css("image_bg_color"),
    );
    let items = args
        .list("items")
        .iter()
        .map(|item| format!("      <li>{item}</li>"))
        .collect::<Vec<String>>()
        .join("\n");
    let image = if args.flag("show_image") {
        format!(r#"  <div class="image">{}</div>"#, args.text("image_caption"))
    } else {
        String::new()
    };
    let body = format!(
        r#"<div class="slide-title">{title}</div>
<div class="card">
  <div class="text">
    <p>{intro}</p>
    <ul>
{items}
    </ul>
  </div>
{image}
</div>"#,
        title = args.text("slide_title"),
        intro = args.text("intro"),
    );
    page(args.text("slide_title"), &style, &body)
}

fn body_focus_template() -> TemplateSpec {
    TemplateSpec::new(
        "body_focus",
        "Body slide: one header and a single emphasized paragraph in a card, with an image area.",
        vec![
            ParamSpec::content("header_text", ParamKind::String, json!("Main idea"), "Header of the slide."),
            ParamSpec::content("paragraph_text", ParamKind::String, json!("A single paragraph explaining the main idea in a few sentences."), "The paragraph; <strong> markup is allowed."),
            ParamSpec::content("image_caption", ParamKind::String, json!("Image placeholder"), "Text for the image area."),
            ParamSpec::style("background_color", ParamKind::String, json!("#FAF0E6"), "Page background color."),
            ParamSpec::style("content_bg_color", ParamKind::String, json!("#FFFFFF"), "Background color of the content card."),
            ParamSpec::style("content_shadow", ParamKind::String, json!("0 4px 8px rgba(0, 0, 0, 0.1)"), "Box shadow of the content card."),
            ParamSpec::style("header_color", ParamKind::String, json!("#3B5998"), "Color of the header."),
            ParamSpec::style("text_body_color", ParamKind::String, json!("#2F4F4F"), "Color of the paragraph."),
            ParamSpec::style("highlight_color", ParamKind::String, json!("#FF4500"), "Color of <strong> text."),
            ParamSpec::style("image_bg_color", ParamKind::String, json!("#E1E5EA"), "Background color of the image area."),
            ParamSpec::style("font_size_px", ParamKind::Integer, json!(28), "Paragraph font size in pixels.").bounded(14.0, 48.0),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_body_focus,
    )
}

fn render_body_focus(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {bg}; display: flex; align-items: center; justify-content: center; }}
.card {{ width: 82%; background: {content_bg}; box-shadow: {shadow}; border-radius: 14px; padding: 56px; display: flex; gap: 48px; }}
.text {{ flex: 3; }}
h1 {{ color: {header}; font-size: 52px; margin: 0 0 28px 0; }}
p {{ color: {body_color}; font-size: {size}px; line-height: 1.6; }}
strong {{ color: {highlight}; }}
.image {{ flex: 2; background: {image_bg}; border-radius: 10px; min-height: 360px; display: flex; align-items: center; justify-content: center; color: #555; }}"#,
        font = args.css("font_family"),
        bg = args.css("background_color"),
        content_bg = args.css("content_bg_color"),
        shadow = args.css("content_shadow"),
        header = args.css("header_color"),
        body_color = args.css("text_body_color"),
        size = args.integer("font_size_px"),
        highlight = args.css("highlight_color"),
        image_bg = args.css("image_bg_color"),
    );
    let body = format!(
        r#"<div class="card">
  <div class="text">
    <h1>{header}</h1>
    <p>{paragraph}</p>
  </div>
  <div class="image">{caption}</div>
</div>"#,
        header = args.text("header_text"),
        paragraph = args.text("paragraph_text"),
        caption = args.text("image_caption"),
    );
    page(args.text("header_text"), &style, &body)
}

fn body_gradient_template() -> TemplateSpec {
    TemplateSpec::new(
        "body_gradient",
        "Body slide on a gradient background: header and paragraph in a translucent card.",
        vec![
            ParamSpec::content("header_text", ParamKind::String, json!("Looking ahead"), "Header of the slide."),
            ParamSpec::content("paragraph_text", ParamKind::String, json!("A paragraph describing where things are heading."), "The paragraph; <span class=\"bold\"> markup is allowed."),
            ParamSpec::content("image_caption", ParamKind::String, json!("Image placeholder"), "Text for the image area."),
            ParamSpec::style("background_gradient", ParamKind::StringList, json!(["#4FACFE", "#00C6FF"]), "Gradient colors for the background, first to last."),
            ParamSpec::style("content_bg_opacity", ParamKind::Number, json!(0.8), "Opacity of the card background.").bounded(0.0, 1.0),
            ParamSpec::style("content_shadow", ParamKind::String, json!("0 4px 8px rgba(0, 0, 0, 0.1)"), "Box shadow of the card."),
            ParamSpec::style("header_color", ParamKind::String, json!("#333333"), "Color of the header."),
            ParamSpec::style("text_body_color", ParamKind::String, json!("#333333"), "Color of the paragraph."),
            ParamSpec::style("highlight_color", ParamKind::String, json!("#FF4500"), "Color of highlighted spans."),
            ParamSpec::style("image_bg_color", ParamKind::String, json!("#CCCCCC"), "Background color of the image area."),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_body_gradient,
    )
}

fn render_body_gradient(args: &SlideArgs) -> String {
    let stops = args
        .list("background_gradient")
        .iter()
        .map(|stop| stop.chars().filter(|ch| !matches!(ch, ';' | '{' | '}' | '<' | '>' | ',' | '(' | ')')).collect::<String>())
        .filter(|stop| !stop.trim().is_empty())
        .collect::<Vec<String>>();
    let gradient = match stops.len() {
        0 => "#4FACFE, #00C6FF".to_string(),
        1 => format!("{0}, {0}", stops[0].trim()),
        _ => stops
            .iter()
            .map(|stop| stop.trim().to_string())
            .collect::<Vec<String>>()
            .join(", "),
    };
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: linear-gradient(135deg, {gradient}); display: flex; align-items: center; justify-content: center; }}
.card {{ width: 80%; background: rgba(255, 255, 255, {opacity:.2}); box-shadow: {shadow}; border-radius: 16px; padding: 56px; display: flex; gap: 40px; }}
.text {{ flex: 3; }}
h1 {{ color: {header}; font-size: 50px; margin: 0 0 24px 0; }}
p {{ color: {body_color}; font-size: 26px; line-height: 1.6; }}
.bold {{ color: {highlight}; font-weight: 700; }}
.image {{ flex: 2; background: {image_bg}; border-radius: 10px; min-height: 320px; display: flex; align-items: center; justify-content: center; }}"#,
        font = args.css("font_family"),
        opacity = args.number("content_bg_opacity"),
        shadow = args.css("content_shadow"),
        header = args.css("header_color"),
        body_color = args.css("text_body_color"),
        highlight = args.css("highlight_color"),
        image_bg = args.css("image_bg_color"),
    );
    let body = format!(
        r#"<div class="card">
  <div class="text">
    <h1>{header}</h1>
    <p>{paragraph}</p>
  </div>
  <div class="image">{caption}</div>
</div>"#,
        header = args.text("header_text"),
        paragraph = args.text("paragraph_text"),
        caption = args.text("image_caption"),
    );
    page(args.text("header_text"), &style, &body)
}

fn conclusion_template() -> TemplateSpec {
    TemplateSpec::new(
        "conclusion",
        "Conclusion slide: a header, a list of numbered takeaways and a final call to action.",
        vec![
            ParamSpec::content("header_text", ParamKind::String, json!("Key takeaways"), "Header text."),
            ParamSpec::content("takeaways", ParamKind::StringList, json!(["First takeaway", "Second takeaway", "Third takeaway"]), "Takeaways, one per entry."),
            ParamSpec::content("call_to_action", ParamKind::String, json!("Next steps"), "Closing sentence under the list."),
            ParamSpec::style("bg_color", ParamKind::String, json!("#F8F8F8"), "Background color."),
            ParamSpec::style("header_color", ParamKind::String, json!("#2C4B7D"), "Color of the header and numbers."),
            ParamSpec::style("text_color", ParamKind::String, json!("#333333"), "Color of the takeaway text."),
            ParamSpec::style("max_items", ParamKind::Integer, json!(5), "Maximum number of takeaways shown.").bounded(1.0, 8.0),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_conclusion,
    )
}

fn render_conclusion(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {bg}; padding: 90px 140px; }}
h1 {{ font-size: 64px; color: {header}; margin: 0 0 48px 0; }}
ol {{ list-style: none; counter-reset: item; padding: 0; margin: 0; }}
li {{ counter-increment: item; font-size: 34px; color: {text}; margin-bottom: 28px; display: flex; gap: 28px; }}
li::before {{ content: counter(item); color: {header}; font-weight: 700; min-width: 48px; }}
.cta {{ margin-top: 56px; font-size: 30px; font-weight: 700; color: {header}; }}"#,
        font = args.css("font_family"),
        bg = args.css("bg_color"),
        header = args.css("header_color"),
        text = args.css("text_color"),
    );
    let limit = args.integer("max_items").max(1) as usize;
    let items = args
        .list("takeaways")
        .into_iter()
        .take(limit)
        .map(|item| format!("  <li>{item}</li>"))
        .collect::<Vec<String>>()
        .join("\n");
    let body = format!(
        "<h1>{header}</h1>\n<ol>\n{items}\n</ol>\n<div class=\"cta\">{cta}</div>",
        header = args.text("header_text"),
        cta = args.text("call_to_action"),
    );
    page(args.text("header_text"), &style, &body)
}

fn closing_template() -> TemplateSpec {
    TemplateSpec::new(
        "closing",
        "Closing slide: a centered headline with a short message and a contact line.",
        vec![
            ParamSpec::content("headline", ParamKind::String, json!("Thank you"), "Centered headline."),
            ParamSpec::content("message", ParamKind::String, json!("Questions and discussion"), "Line under the headline."),
            ParamSpec::content("contact", ParamKind::String, json!(""), "Optional contact line; hidden when empty."),
            ParamSpec::style("bg_color", ParamKind::String, json!("#2C4B7D"), "Background color."),
            ParamSpec::style("text_color", ParamKind::String, json!("#FFFFFF"), "Text color."),
            ParamSpec::style("accent_color", ParamKind::String, json!("#F8C146"), "Color of the rule under the headline."),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_closing,
    )
}

fn render_closing(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {bg}; color: {text}; display: flex; flex-direction: column; align-items: center; justify-content: center; text-align: center; }}
h1 {{ font-size: 96px; margin: 0; }}
.rule {{ width: 160px; height: 6px; background: {accent}; margin: 32px 0; }}
.message {{ font-size: 34px; }}
.contact {{ font-size: 24px; margin-top: 40px; opacity: 0.8; }}"#,
        font = args.css("font_family"),
        bg = args.css("bg_color"),
        text = args.css("text_color"),
        accent = args.css("accent_color"),
    );
    let contact = args.text("contact").trim();
    let contact = if contact.is_empty() {
        String::new()
    } else {
        format!("\n<div class=\"contact\">{contact}</div>")
    };
    let body = format!(
        "<h1>{headline}</h1>\n<div class=\"rule\"></div>\n<div class=\"message\">{message}</div>{contact}",
        headline = args.text("headline"),
        message = args.text("message"),
    );
    page(args.text("headline"), &style, &body)
}

/// Visible placeholder used when a slide could not be produced normally.
pub fn error_slide_template() -> TemplateSpec {
    TemplateSpec::new(
        ERROR_TEMPLATE,
        "Error slide: a clearly marked placeholder with a title and a short detail line.",
        vec![
            ParamSpec::content("title", ParamKind::String, json!("Error"), "What went wrong."),
            ParamSpec::content("detail", ParamKind::String, json!("This slide could not be generated."), "Additional detail."),
            ParamSpec::style("bg_color", ParamKind::String, json!("#FDECEA"), "Background color."),
            ParamSpec::style("accent_color", ParamKind::String, json!("#B3261E"), "Color of the border and title."),
            ParamSpec::style("font_family", ParamKind::String, json!(FONT_STACK), "Font family for all text."),
        ],
        render_error_slide,
    )
}

fn render_error_slide(args: &SlideArgs) -> String {
    let style = format!(
        r#"body {{ margin: 0; height: 100vh; font-family: {font}; background: {bg}; display: flex; align-items: center; justify-content: center; }}
.box {{ border: 8px dashed {accent}; border-radius: 16px; padding: 64px 96px; text-align: center; background: #FFFFFF; }}
h1 {{ color: {accent}; font-size: 72px; margin: 0 0 24px 0; }}
p {{ color: #333333; font-size: 30px; margin: 0; }}"#,
        font = args.css("font_family"),
        bg = args.css("bg_color"),
        accent = args.css("accent_color"),
    );
    let body = format!(
        "<div class=\"box\">\n  <h1>{}</h1>\n  <p>{}</p>\n</div>",
        args.text("title"),
        args.text("detail"),
    );
    page(args.text("title"), &style, &body)
}

fn page(title: &str, style: &str, body: &str) -> String {
    let title = strip_tags(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=1920, initial-scale=1.0">
<title>{title}</title>
<style>
* {{ box-sizing: border-box; }}
{style}
</style>
</head>
<body>
{body}
</body>
</html>
"#
    )
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use crate::templates::TemplateRegistry;

    use super::strip_tags;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn content_arguments_appear_in_the_html() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let html = registry.render(
            "body_bullets",
            &args(json!({
                "slide_title": "Why networking matters",
                "items": ["<span class=\"keyword\">Mentorship</span>: guidance", "Collaboration"],
            })),
        )?;
        assert!(html.contains("<title>Why networking matters</title>"));
        assert!(html.contains("<li><span class=\"keyword\">Mentorship</span>: guidance</li>"));
        assert!(html.contains("<li>Collaboration</li>"));
        Ok(())
    }

    #[test]
    fn style_values_cannot_escape_the_declaration() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let html = registry.render(
            "closing",
            &args(json!({"bg_color": "red; } body { display: none", "contact": ""})),
        )?;
        assert!(html.contains("background: red  body  display: none;"));
        assert!(!html.contains("class=\"contact\""));
        Ok(())
    }

    #[test]
    fn hidden_image_drops_the_placeholder() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let shown = registry.render("body_bullets", &Map::new())?;
        let hidden = registry.render("body_bullets", &args(json!({"show_image": "false"})))?;
        assert!(shown.contains("<div class=\"image\">"));
        assert!(!hidden.contains("<div class=\"image\">"));
        Ok(())
    }

    #[test]
    fn gradient_with_one_stop_is_doubled() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let html = registry.render(
            "body_gradient",
            &args(json!({"background_gradient": ["#111111"], "content_bg_opacity": 0.5})),
        )?;
        assert!(html.contains("linear-gradient(135deg, #111111, #111111)"));
        assert!(html.contains("rgba(255, 255, 255, 0.50)"));
        Ok(())
    }

    #[test]
    fn conclusion_caps_the_takeaway_list() -> anyhow::Result<()> {
        let registry = TemplateRegistry::builtin()?;
        let html = registry.render(
            "conclusion",
            &args(json!({"takeaways": ["one", "two", "three"], "max_items": 2})),
        )?;
        assert!(html.contains("<li>one</li>"));
        assert!(html.contains("<li>two</li>"));
        assert!(!html.contains("<li>three</li>"));
        Ok(())
    }

    #[test]
    fn strip_tags_keeps_text_only() {
        assert_eq!(strip_tags("<strong>Goal</strong> setting"), "Goal setting");
    }
}
